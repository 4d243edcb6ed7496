use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatatablesError {
    #[error(transparent)]
    Parse(#[from] ParseFailure),

    #[error("Failed to parse schema content: JSON parsing failed: {0}")]
    SchemaSyntax(String),

    #[error("Failed to parse schema content: Validation failed: {0}")]
    SchemaValidation(String),

    #[error("The provided schema path is a folder. The path must either point to an existing schema file, or not exist. If the path does not exist, a new schema file will be created.")]
    SchemaPathIsDirectory(String),

    #[error("The schema folder must exist before the schema file can be created: {0}")]
    SchemaFolderMissing(String),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("Worker protocol violation: {0}")]
    Protocol(String),

    #[error("The document loader was terminated before the request settled")]
    LoaderTerminated,

    #[error("Path is a directory: {path}")]
    IsDirectory { path: String },

    #[error("Parent directory does not exist: {path}")]
    MissingParent { path: String },

    #[error("Attempted to create file that already exists: {path}")]
    AlreadyExists { path: String },

    #[error("File not found: {path}")]
    NotFound { path: String },

    #[error("Cannot read file: {path} is not a readable file")]
    NotAFile { path: String },

    #[error("Expected table to be a tag starting with '#'. Got '{0}'.")]
    InvalidTableName(String),

    #[error("Table does not exist: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Invalid change to table {table}: {reason}")]
    InvalidSchemaChange { table: String, reason: String },

    #[error("Unable to create template. The template directory ({0}) does not exist in the vault. This directory must exist before templates can be created.")]
    TemplateDirMissing(String),

    #[error("Unable to instantiate template. The instantiation directory does not exist: {0}")]
    ItemsDirMissing(String),

    #[error("Unable to instantiate template. The requested template does not exist: {0}")]
    TemplateNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// A parser failure, shared by every caller waiting on the same path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to parse document '{path}': {message}")]
pub struct ParseFailure {
    pub path: String,
    pub message: String,
}

/// Outcome of a failed debounce cycle. Every caller of that cycle receives a copy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    #[error("Unable to persist schema. Serialization produced a result which cannot be parsed: {0}")]
    Corruption(String),

    #[error("Unable to persist schema. Write failed: {0}")]
    Write(String),

    #[error("Persist was cancelled before the schema was written")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, DatatablesError>;
