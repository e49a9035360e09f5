//! Typed certscan endpoints

use crate::client::{ApiClient, RequestOptions};
use crate::error::ApiError;
use crate::progress::{MultipartUpload, ProgressCallback};
use crate::types::{
    Certificate, Credentials, Envelope, ForgotPasswordRequest, LoginResponse, MessageResponse,
    ProfileUpdate, RegisterRequest, RegisterResponse, ResetPasswordRequest, Scan, ScanStats,
    StatsRange, StatsSeries, UploadResponse, User,
};
use bytes::Bytes;
use serde_json::Value;
use tracing::{info, warn};

/// Public endpoints
impl ApiClient {
    /// Exchange credentials for a token and open the session
    pub async fn login(
        &self,
        credentials: &Credentials,
        remember_me: bool,
    ) -> Result<LoginResponse, ApiError> {
        let response: LoginResponse = self
            .post("/login", credentials, &RequestOptions::new())
            .await?;

        self.session().set_token(&response.token);
        if remember_me {
            self.session().set_remember_me(true);
        }
        info!("Logged in as {}", credentials.email);
        Ok(response)
    }

    /// Create an account; opens the session when the API returns a token
    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
        let response: RegisterResponse = self
            .post("/register", request, &RequestOptions::new())
            .await?;

        if let Some(token) = response.token.as_deref().filter(|t| !t.is_empty()) {
            self.session().set_token(token);
            info!("Registered and logged in as {}", request.email);
        } else {
            info!("Registered {}", request.email);
        }
        Ok(response)
    }

    /// Request a password reset link
    pub async fn forgot_password(&self, email: &str) -> Result<MessageResponse, ApiError> {
        let request = ForgotPasswordRequest {
            email: email.to_string(),
        };
        let response: Option<MessageResponse> = self
            .post("/forgot-password", &request, &RequestOptions::new())
            .await?;
        Ok(response.unwrap_or_default())
    }

    /// Submit a new password with the reset token from the emailed link
    pub async fn reset_password(
        &self,
        request: &ResetPasswordRequest,
    ) -> Result<MessageResponse, ApiError> {
        let response: Option<MessageResponse> = self
            .post("/reset-password", request, &RequestOptions::new())
            .await?;
        Ok(response.unwrap_or_default())
    }
}

/// Endpoints that require a session
impl ApiClient {
    /// Invalidate the server-side session. The local session is cleared even
    /// when the server call fails.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let result = self
            .post::<_, Value>("/logout", &serde_json::json!({}), &RequestOptions::new())
            .await;
        self.session().clear_token();

        match result {
            Ok(_) => {
                info!("Logged out");
                Ok(())
            }
            Err(e) => {
                warn!("Server-side logout failed, local session cleared anyway: {e}");
                Err(e)
            }
        }
    }

    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.get("/user", &RequestOptions::new()).await
    }

    /// Update profile fields and, optionally, the password
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Value, ApiError> {
        self.put("/update", update, &RequestOptions::new()).await
    }

    pub async fn certificates(&self) -> Result<Vec<Certificate>, ApiError> {
        let envelope: Envelope<Vec<Certificate>> =
            self.get("/certifs", &RequestOptions::new()).await?;
        unwrap_envelope(envelope, "Failed to fetch certificates")
    }

    /// Upload one or more PDF files as `files[]`
    pub async fn upload_files(
        &self,
        upload: MultipartUpload,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadResponse, ApiError> {
        let count = upload.len();
        let response: UploadResponse = self
            .upload("/upload-files", upload, &RequestOptions::new(), progress)
            .await?;
        info!(sent = count, accepted = response.files.len(), "Upload complete");
        Ok(response)
    }

    pub async fn delete_certificate(&self, reference: &str) -> Result<(), ApiError> {
        let path = format!("/delete-file/{}", path_segment(reference)?);
        let _: Value = self.delete(&path, &RequestOptions::new()).await?;
        info!(reference, "Certificate deleted");
        Ok(())
    }

    /// Original uploaded file
    pub async fn download_certificate(&self, reference: &str) -> Result<Bytes, ApiError> {
        let path = format!("/download-file/{}", path_segment(reference)?);
        self.get_bytes(&path, &RequestOptions::new()).await
    }

    pub async fn scans(&self) -> Result<Vec<Scan>, ApiError> {
        let envelope: Envelope<Vec<Scan>> = self.get("/scans", &RequestOptions::new()).await?;
        unwrap_envelope(envelope, "Failed to fetch scans")
    }

    pub async fn scan_stats(&self) -> Result<ScanStats, ApiError> {
        let envelope: Envelope<ScanStats> =
            self.get("/scan-stats", &RequestOptions::new()).await?;
        unwrap_envelope(envelope, "Failed to fetch scan statistics")
    }

    pub async fn stats(&self, range: StatsRange) -> Result<StatsSeries, ApiError> {
        let options = RequestOptions::new().query("range", range.as_str());
        self.get("/stats", &options).await
    }
}

fn unwrap_envelope<T>(envelope: Envelope<T>, fallback: &str) -> Result<T, ApiError> {
    match envelope {
        Envelope {
            success: true,
            data: Some(data),
            ..
        } => Ok(data),
        Envelope { message, .. } => Err(ApiError::Server {
            status: 200,
            message: message.unwrap_or_else(|| fallback.to_string()),
            payload: None,
        }),
    }
}

/// Percent-encode a single path segment
fn path_segment(raw: &str) -> Result<String, ApiError> {
    if raw.trim().is_empty() {
        return Err(ApiError::Configuration("reference number is empty".into()));
    }
    Ok(url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_segment_encoding() {
        assert_eq!(path_segment("REF123").unwrap(), "REF123");
        assert_eq!(path_segment("a/b c").unwrap(), "a%2Fb%20c");
        assert!(path_segment("  ").is_err());
    }

    #[test]
    fn test_failed_envelope_uses_server_message() {
        let envelope: Envelope<Vec<Scan>> = Envelope {
            success: false,
            data: None,
            message: Some("quota".into()),
        };
        let err = unwrap_envelope(envelope, "fallback").unwrap_err();
        assert_eq!(err.message(), "quota");

        let envelope: Envelope<Vec<Scan>> = Envelope {
            success: true,
            data: None,
            message: None,
        };
        let err = unwrap_envelope(envelope, "fallback").unwrap_err();
        assert_eq!(err.message(), "fallback");
    }
}
