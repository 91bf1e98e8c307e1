use axum::extract::FromRequest;

use crate::errors::AppError;

/// `Json` body extractor whose rejections render as the `AppError` envelope,
/// so an unparseable body reports the `malformed` kind instead of plain text.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);
