use std;
use trackable;
use trackable::error::ErrorKindExt;

/// crate固有のエラー型.
#[derive(Debug, Clone, TrackableError)]
pub struct Error(trackable::error::TrackableError<ErrorKind>);
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if let Some(e) = e.get_ref().and_then(|e| e.downcast_ref::<Error>()).cloned() {
            e
        } else if e.kind() == std::io::ErrorKind::InvalidInput {
            ErrorKind::InvalidInput.cause(e).into()
        } else {
            ErrorKind::Other.cause(e).into()
        }
    }
}
impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        if *e.kind() == ErrorKind::InvalidInput {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
        } else {
            std::io::Error::new(std::io::ErrorKind::Other, e)
        }
    }
}

/// 発生し得るエラーの種別.
///
/// 空きグラニュールが不足している状態はエラーではなく、
/// [`GranHeap::allocate`]の結果が`None`となることで表現される.
///
/// [`GranHeap::allocate`]: ./struct.GranHeap.html#method.allocate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 入力が不正.
    ///
    /// 初期化パラメータの誤りや、一度に割り当て可能なサイズ(32グラニュール)を超える要求、
    /// ヒープ外のアドレス指定、等がこれに該当する.
    ///
    /// # 典型的な対応策
    ///
    /// - 利用者側のプログラムを修正して入力を正しくする
    InvalidInput,

    /// グラニュールテーブルの状態が不整合に陥っている.
    ///
    /// 二重解放や、割当時とは異なるサイズでの解放、テーブルの破損等を示している.
    /// このエラーが返された場合には、テーブル自体は変更されていない.
    ///
    /// # 典型的な対応策
    ///
    /// - バグ修正を行ってプログラムを更新する
    InconsistentState,

    /// その他エラー.
    ///
    /// E.g., ヘッダの読み書き時のI/Oエラー
    Other,
}
impl trackable::error::ErrorKind for ErrorKind {}
