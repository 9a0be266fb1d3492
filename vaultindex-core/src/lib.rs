mod client;

pub use reqwest::StatusCode;

pub use client::{
    ApiErrorClass, ChunkingParams, DocumentPage, IndexApiError, IndexClient, MetadataEntry,
    RemoteDocument, Store, StoreStats, UploadOperation, UploadRequest, meta_keys,
};
