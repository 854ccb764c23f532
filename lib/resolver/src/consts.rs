pub(crate) const LBRACE: &[u8] = b"{";
pub(crate) const RBRACE: &[u8] = b"}";
pub(crate) const LBRACK: &[u8] = b"[";
pub(crate) const RBRACK: &[u8] = b"]";
pub(crate) const COMMA: &[u8] = b",";
pub(crate) const COLON: &[u8] = b":";
pub(crate) const QUOTE: &[u8] = b"\"";
pub(crate) const BACKSLASH: &[u8] = b"\\";
pub(crate) const SLASH: &[u8] = b"/";
pub(crate) const NULL: &[u8] = b"null";
pub(crate) const TRUE: &[u8] = b"true";
pub(crate) const FALSE: &[u8] = b"false";
pub(crate) const EMPTY_OBJECT: &[u8] = b"{}";
pub(crate) const EMPTY_ARRAY: &[u8] = b"[]";
pub(crate) const QUOTED_COMMA: &[u8] = b"\",\"";

pub(crate) const LITERAL_DATA: &[u8] = b"data";

pub(crate) const UNABLE_TO_RESOLVE: &[u8] = b"unable to resolve";
