//! HTTP transport for catalog pages, chapter archives and page images.
//!
//! Bodies are streamed to disk so whole-chapter archives never sit in memory.
//! [`classify_error`] decides which failures switch a run to per-page fetching.
//!
//! # Example
//!
//! ```no_run
//! use chapterdl_core::download::HttpClient;
//! use std::path::Path;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new();
//! let bytes = client
//!     .download_to_path(
//!         "https://example.com/one-piece-750.zip",
//!         Path::new("./library/One Piece/One Piece 750.zip"),
//!         Some(Duration::from_secs(30)),
//!     )
//!     .await?;
//! println!("Downloaded {bytes} bytes");
//! # Ok(())
//! # }
//! ```

mod classify;
mod client;
mod constants;
mod error;
mod filename;

pub use classify::{FailureClass, classify_error};
pub use client::HttpClient;
pub use constants::{CONNECT_TIMEOUT_SECS, DEFAULT_ARCHIVE_TIMEOUT_MS, READ_TIMEOUT_SECS};
pub use error::DownloadError;
pub use filename::{filename_from_url, sanitize_filename};

