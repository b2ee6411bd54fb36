// Directory: report upload and query contract

pub mod client;
pub mod protocol;

pub use client::{
    now_millis, DirectoryClient, DirectoryConfig, DirectoryError, HttpDirectory, MemoryDirectory,
    DEFAULT_DIRECTORY_URL, DEFAULT_HTTP_TIMEOUT,
};
pub use protocol::{
    QueryRequest, QueryResponse, RegisterRequest, RegisterResponse, ReportRecord,
    CODE_INVALID_KEY, CODE_OK,
};
