use crate::sources::DataSourceError;

/// Resolution failure. `NonNullableNull` and `TypeNameSkipped` double as
/// control-flow signals inside the tree walk: ancestors decide whether to
/// swallow them (nullable parent, elided element) or keep propagating.
#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("non nullable field value is null")]
    NonNullableNull,
    #[error("skipped because of __typename condition")]
    TypeNameSkipped,
    #[error("invalid header path: header variables must be of this format: .request.header.{{ key }}")]
    HeaderPathInvalid,
    #[error("variable value not found at path {path}")]
    VariableValueNotFound { path: String },
    #[error("context must be reset before it can be used again")]
    InvalidContext,
    #[error(transparent)]
    DataSource(#[from] DataSourceError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
