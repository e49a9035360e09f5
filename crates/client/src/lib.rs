//! Certscan API client
//!
//! Session state, the authenticated request gateway and the route guard that
//! the certscan front ends are built on.

pub mod api;
pub mod client;
pub mod error;
pub mod progress;
pub mod routes;
pub mod session;
pub mod types;
pub mod view;

pub use client::{ApiClient, ApiClientBuilder, DEFAULT_BASE_URL, RequestOptions};
pub use error::{ApiError, FieldErrors};
pub use progress::{MultipartUpload, ProgressCallback, UploadFile, UploadProgress};
pub use routes::{GuardDecision, Navigator, Route, RouteGuard};
pub use session::{FileStorage, MemoryStorage, SessionStore, Storage, StorageError};
pub use view::{CertificateList, ScanSummary, ViewHandle, ViewScope};
