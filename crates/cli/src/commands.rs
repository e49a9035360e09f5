//! CLI commands
//!
//! Each command plays the part of one page of the web front end: it enters
//! its route through the guard, talks to the API through the shared client
//! and renders the result.

use crate::app::App;
use anyhow::{Result, anyhow, bail};
use certscan_client::types::{
    Credentials, ProfileUpdate, RegisterRequest, ResetPasswordRequest, Scan, ScanStats,
    StatsRange, StatsSeries, User,
};
use certscan_client::{
    ApiError, CertificateList, MultipartUpload, ProgressCallback, Route, ScanSummary,
    SessionStore, ViewHandle,
};
use clap::Subcommand;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and keep the session for later commands
    Login {
        #[arg(long)]
        email: String,

        #[arg(long, env = "CERTSCAN_PASSWORD", hide_env_values = true)]
        password: String,

        /// Remember this device
        #[arg(long)]
        remember_me: bool,
    },

    /// Create an account
    Register {
        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,

        #[arg(long, default_value = "")]
        phone: String,

        #[arg(long, env = "CERTSCAN_PASSWORD", hide_env_values = true)]
        password: String,

        /// Defaults to --password
        #[arg(long)]
        password_confirmation: Option<String>,
    },

    /// Request a password reset link by email
    ForgotPassword {
        #[arg(long)]
        email: String,
    },

    /// Choose a new password using the emailed reset link
    ResetPassword {
        /// Full reset link; token and email are read from its query string
        #[arg(long, conflicts_with_all = ["token", "email"])]
        link: Option<String>,

        #[arg(long)]
        token: Option<String>,

        #[arg(long)]
        email: Option<String>,

        #[arg(long, env = "CERTSCAN_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long)]
        password_confirmation: String,
    },

    /// End the session
    Logout,

    /// Show whether a session is stored
    Status,

    /// Profile, scan counters, scan activity and recent scans
    Dashboard {
        /// Bucket size for the activity chart
        #[arg(long, default_value = "week")]
        range: StatsRange,
    },

    /// Upload, list and manage certificates
    Certs {
        #[command(subcommand)]
        command: CertCommands,
    },

    /// Show or edit the profile
    Profile {
        #[command(subcommand)]
        command: Option<ProfileCommands>,
    },
}

#[derive(Subcommand)]
pub enum CertCommands {
    /// List uploaded certificates
    List {
        /// Only show certificates whose name or reference contains this
        #[arg(long)]
        search: Option<String>,
    },

    /// Upload one or more PDF files
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Delete a certificate by reference number
    Delete {
        reference: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Download the original file
    Download {
        reference: String,

        /// Output path (defaults to <reference>.pdf)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ProfileCommands {
    /// Show the profile
    Show,

    /// Update profile fields or the password
    Update {
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        phone: Option<String>,

        #[arg(long)]
        password: Option<String>,

        #[arg(long, requires = "password")]
        password_confirmation: Option<String>,
    },
}

impl Commands {
    pub async fn execute(self, app: &App) -> Result<()> {
        match self {
            Self::Login {
                email,
                password,
                remember_me,
            } => login(app, email, password, remember_me).await,
            Self::Register {
                name,
                email,
                phone,
                password,
                password_confirmation,
            } => {
                let request = RegisterRequest {
                    password_confirmation: password_confirmation
                        .unwrap_or_else(|| password.clone()),
                    name,
                    email,
                    phone,
                    password,
                };
                register(app, request).await
            }
            Self::ForgotPassword { email } => forgot_password(app, &email).await,
            Self::ResetPassword {
                link,
                token,
                email,
                password,
                password_confirmation,
            } => {
                let (token, email) = match link {
                    Some(link) => reset_params(&link)?,
                    None => (token, email),
                };
                reset_password(app, token, email, password, password_confirmation).await
            }
            Self::Logout => logout(app).await,
            Self::Status => {
                status(app);
                Ok(())
            }
            Self::Dashboard { range } => dashboard(app, range).await,
            Self::Certs { command } => command.execute(app).await,
            Self::Profile { command } => {
                command
                    .unwrap_or(ProfileCommands::Show)
                    .execute(app)
                    .await
            }
        }
    }
}

impl CertCommands {
    pub async fn execute(self, app: &App) -> Result<()> {
        let view = app.open(Route::Certification)?;
        match self {
            Self::List { search } => {
                let list = load_certificates(app, &view).await?;
                print_certificates(&list, search.as_deref().unwrap_or_default());
                Ok(())
            }
            Self::Upload { files } => upload(app, &view, files).await,
            Self::Delete { reference, yes } => {
                if !yes && !confirm("Are you sure you want to delete this certificate?")? {
                    println!("Cancelled.");
                    return Ok(());
                }
                delete(app, &view, &reference).await
            }
            Self::Download { reference, output } => {
                let bytes = app
                    .client
                    .download_certificate(&reference)
                    .await
                    .map_err(failure)?;
                let output = output.unwrap_or_else(|| PathBuf::from(format!("{reference}.pdf")));
                tokio::fs::write(&output, &bytes).await?;
                println!("Saved {} ({} bytes)", output.display(), bytes.len());
                Ok(())
            }
        }
    }
}

impl ProfileCommands {
    pub async fn execute(self, app: &App) -> Result<()> {
        let view = app.open(Route::Profile)?;
        let user = applied(
            &app.session,
            "profile",
            view.settle(app.client.current_user()).await,
        )?;

        match self {
            Self::Show => {
                print_user(&user);
                Ok(())
            }
            Self::Update {
                name,
                email,
                phone,
                password,
                password_confirmation,
            } => {
                let mut update = ProfileUpdate::from(&user);
                if let Some(name) = name {
                    update.name = name;
                }
                if let Some(email) = email {
                    update.email = email;
                }
                if let Some(phone) = phone {
                    update.phone = phone;
                }
                if let Some(password) = password.filter(|p| !p.is_empty()) {
                    let confirmation = password_confirmation.unwrap_or_default();
                    if confirmation != password {
                        bail!("Passwords do not match.");
                    }
                    update.password = Some(password);
                    update.password_confirmation = Some(confirmation);
                }

                app.client.update_profile(&update).await.map_err(failure)?;
                println!("Profile updated.");
                Ok(())
            }
        }
    }
}

async fn login(app: &App, email: String, password: String, remember_me: bool) -> Result<()> {
    app.open(Route::Login)?;
    if email.trim().is_empty() || password.is_empty() {
        bail!("Email and password are required.");
    }

    let credentials = Credentials { email, password };
    match app.client.login(&credentials, remember_me).await {
        Ok(_) => {
            app.open(Route::Dashboard)?;
            println!("Logged in as {}.", credentials.email);
            Ok(())
        }
        Err(e @ (ApiError::Auth { .. } | ApiError::Validation { .. })) => {
            info!("Login rejected: {e}");
            bail!("Invalid email or password. Please try again.")
        }
        Err(e) => Err(failure(e)),
    }
}

async fn register(app: &App, request: RegisterRequest) -> Result<()> {
    app.open(Route::Register)?;
    app.client.register(&request).await.map_err(failure)?;

    if app.session.is_authenticated() {
        app.open(Route::Dashboard)?;
        println!("Account created. You are logged in as {}.", request.email);
    } else {
        println!("Account created. Log in with `certscan login --email {}`.", request.email);
    }
    Ok(())
}

async fn forgot_password(app: &App, email: &str) -> Result<()> {
    app.open(Route::ForgotPassword)?;
    if email.trim().is_empty() {
        bail!("Please enter your email address.");
    }

    app.client.forgot_password(email).await.map_err(failure)?;
    println!("If this email exists, a reset link has been sent.");
    Ok(())
}

/// Token and email from a reset link's query string
fn reset_params(link: &str) -> Result<(Option<String>, Option<String>)> {
    let url = url::Url::parse(link).map_err(|e| anyhow!("Invalid reset link: {e}"))?;
    let mut token = None;
    let mut email = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "token" => token = Some(value.into_owned()),
            "email" => email = Some(value.into_owned()),
            _ => {}
        }
    }
    Ok((token, email))
}

async fn reset_password(
    app: &App,
    token: Option<String>,
    email: Option<String>,
    password: String,
    password_confirmation: String,
) -> Result<()> {
    app.open(Route::ResetPassword)?;
    if password.is_empty() || password_confirmation.is_empty() {
        bail!("Please fill in all fields.");
    }
    if password != password_confirmation {
        bail!("Passwords do not match.");
    }
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        bail!("Missing reset token.");
    };

    let request = ResetPasswordRequest {
        token,
        email: email.unwrap_or_default(),
        password,
        password_confirmation,
    };
    app.client.reset_password(&request).await.map_err(failure)?;

    app.open(Route::Login)?;
    println!("Password reset. You can now log in.");
    Ok(())
}

async fn logout(app: &App) -> Result<()> {
    if !app.session.is_authenticated() {
        println!("Not logged in.");
        return Ok(());
    }

    if let Err(e) = app.client.logout().await {
        warn!("Server did not confirm logout: {e}");
    }
    app.navigator.redirect_to_login();
    println!("Logged out.");
    Ok(())
}

fn status(app: &App) {
    if app.session.is_authenticated() {
        println!("Logged in.");
        if app.session.remember_me() {
            println!("This device is remembered.");
        }
    } else {
        println!("Not logged in.");
    }
}

async fn dashboard(app: &App, range: StatsRange) -> Result<()> {
    let view = app.open(Route::Dashboard)?;

    // Independent requests; each section renders or fails on its own
    let (user, scans, stats, series) = tokio::join!(
        view.settle(app.client.current_user()),
        view.settle(app.client.scans()),
        view.settle(app.client.scan_stats()),
        view.settle(app.client.stats(range)),
    );

    let user = section(&app.session, "profile", user)?;
    let scans = section(&app.session, "scan history", scans)?;
    let stats = section(&app.session, "scan statistics", stats)?;
    let series = section(&app.session, "scan activity", series)?;

    let name = user.as_ref().map_or("", |u| u.name.as_str());
    println!("Welcome{}{name}", if name.is_empty() { "" } else { ", " });
    println!();

    if let Some(scans) = &scans {
        let summary = ScanSummary::from_scans(scans);
        println!(
            "Scans: {} total, {} valid, {} invalid",
            summary.total, summary.valid, summary.invalid
        );
    }
    if let Some(stats) = stats {
        print_breakdown(stats);
    }
    if let Some(series) = &series {
        print_activity(series, range);
    }
    if let Some(scans) = &scans {
        print_scans(scans);
    }
    Ok(())
}

async fn load_certificates(app: &App, view: &ViewHandle) -> Result<CertificateList> {
    let outcome = view.settle(app.client.certificates()).await;
    let items = applied(&app.session, "certificates", outcome)?;
    Ok(CertificateList::new(items))
}

async fn upload(app: &App, view: &ViewHandle, files: Vec<PathBuf>) -> Result<()> {
    if files.is_empty() {
        bail!("Please select at least one file.");
    }
    if let Some(file) = files.iter().find(|f| {
        !f.extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
    }) {
        bail!("Only PDF files can be uploaded: {}", file.display());
    }

    let mut list = load_certificates(app, view).await?;
    let upload = MultipartUpload::from_paths(&files).await?;

    let progress: ProgressCallback = Arc::new(|percent: u8| {
        eprint!("\rUploading... {percent:>3}%");
        let _ = std::io::stderr().flush();
    });
    let result = view
        .settle(app.client.upload_files(upload, Some(progress)))
        .await;
    eprintln!();

    let response = applied(&app.session, "upload result", result)?;
    println!("Uploaded {} file(s).", response.files.len());
    list.extend(response.files);
    print_certificates(&list, "");
    Ok(())
}

async fn delete(app: &App, view: &ViewHandle, reference: &str) -> Result<()> {
    let mut list = load_certificates(app, view).await?;
    app.client
        .delete_certificate(reference)
        .await
        .map_err(failure)?;

    if !list.remove(reference) {
        warn!(reference, "Deleted certificate was not in the loaded list");
    }
    println!("Deleted {reference}.");
    print_certificates(&list, "");
    Ok(())
}

/// Result of a request made by a view that must be shown for the command to succeed
fn applied<T>(
    session: &SessionStore,
    what: &str,
    outcome: Option<Result<T, ApiError>>,
) -> Result<T> {
    match outcome {
        None => Err(closed(session, what)),
        Some(result) => result.map_err(failure),
    }
}

/// Result of one independently rendered section
fn section<T>(
    session: &SessionStore,
    what: &str,
    outcome: Option<Result<T, ApiError>>,
) -> Result<Option<T>> {
    match outcome {
        None => Err(closed(session, what)),
        Some(Ok(value)) => Ok(Some(value)),
        Some(Err(e)) if e.is_auth_failure() => Err(failure(e)),
        Some(Err(e)) => {
            eprintln!("Could not load {what}: {}", e.message());
            Ok(None)
        }
    }
}

/// A view closes early when another request ended the session
fn closed(session: &SessionStore, what: &str) -> anyhow::Error {
    if session.is_authenticated() {
        anyhow!("The view closed before the {what} arrived.")
    } else {
        anyhow!("Session expired. Log in again with `certscan login`.")
    }
}

/// Turn an API failure into a user-facing error
fn failure(err: ApiError) -> anyhow::Error {
    match &err {
        ApiError::Validation { message, errors, .. } => {
            let mut text = message.clone();
            for (field, messages) in errors {
                if let Some(first) = messages.first() {
                    text.push_str(&format!("\n  {field}: {first}"));
                }
            }
            anyhow!(text)
        }
        ApiError::Auth { .. } => anyhow!("Not authorized: {}", err.message()),
        _ => anyhow!(err.message()),
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes" | "Yes"))
}

fn print_user(user: &User) {
    println!("Name:  {}", if user.name.is_empty() { "User" } else { user.name.as_str() });
    println!("Email: {}", user.email);
    if !user.phone.is_empty() {
        println!("Phone: {}", user.phone);
    }
}

fn print_certificates(list: &CertificateList, search: &str) {
    let matches = list.filter(search);
    if matches.is_empty() {
        println!("No certificates found.");
        return;
    }

    println!("{:<20} {:<40} {}", "REFERENCE", "FILE", "STATUS");
    for cert in matches {
        println!(
            "{:<20} {:<40} {}",
            cert.reference_number,
            cert.original_name,
            cert.status.as_deref().unwrap_or("-")
        );
    }
}

fn print_breakdown(stats: ScanStats) {
    let total = stats.valid + stats.invalid;
    if total == 0 {
        println!("No scans yet.");
        return;
    }
    let share = |n: u64| certscan_client::progress::percentage(n, total);
    println!(
        "Valid: {} ({}%)  Invalid: {} ({}%)",
        stats.valid,
        share(stats.valid),
        stats.invalid,
        share(stats.invalid)
    );
}

fn print_activity(series: &StatsSeries, range: StatsRange) {
    println!();
    println!("Activity ({range})");
    for (label, ok, failed) in series.rows() {
        println!("  {label:<12} {ok:>5} ok  {failed:>5} failed");
    }
}

fn print_scans(scans: &[Scan]) {
    println!();
    if scans.is_empty() {
        println!("No scans recorded.");
        return;
    }
    println!("{:<40} {:<10} {}", "CERTIFICATE", "STATUS", "DATE");
    for scan in scans {
        let date = scan
            .scanned_at
            .map_or_else(|| "-".to_string(), |d| d.format("%d %b %Y %H:%M").to_string());
        println!(
            "{:<40} {:<10} {date}",
            scan.certif_name.as_deref().unwrap_or("N/A"),
            scan.status
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_reset_params_from_link() {
        let (token, email) =
            reset_params("https://app.example.com/reset-password?token=t0k&email=ada%40example.com")
                .unwrap();
        assert_eq!(token.as_deref(), Some("t0k"));
        assert_eq!(email.as_deref(), Some("ada@example.com"));

        let (token, email) = reset_params("https://app.example.com/reset-password").unwrap();
        assert!(token.is_none() && email.is_none());
        assert!(reset_params("not a link").is_err());
    }

    #[test]
    fn test_failure_lists_field_errors() {
        let mut errors = BTreeMap::new();
        errors.insert("email".to_string(), vec!["already taken".to_string()]);
        let err = failure(ApiError::Validation {
            message: "Invalid data".into(),
            errors,
            payload: None,
        });
        assert_eq!(err.to_string(), "Invalid data\n  email: already taken");
    }

    #[test]
    fn test_section_keeps_non_auth_failures_local() {
        let session = SessionStore::in_memory();
        session.set_token("abc123");

        let outcome: Option<Result<u8, ApiError>> = Some(Err(ApiError::Server {
            status: 500,
            message: "boom".into(),
            payload: None,
        }));
        assert!(section(&session, "stats", outcome).unwrap().is_none());

        let outcome: Option<Result<u8, ApiError>> = Some(Err(ApiError::Auth {
            status: 401,
            message: "expired".into(),
            payload: None,
        }));
        assert!(section(&session, "stats", outcome).is_err());
        assert!(section::<u8>(&session, "stats", None).is_err());
    }

    #[test]
    fn test_closed_view_reports_expired_session() {
        let session = SessionStore::in_memory();
        session.set_token("abc123");
        let err = section::<u8>(&session, "profile", None).unwrap_err();
        assert_eq!(err.to_string(), "The view closed before the profile arrived.");

        session.clear_token();
        let err = section::<u8>(&session, "profile", None).unwrap_err();
        assert!(err.to_string().starts_with("Session expired."));
        let err = applied::<u8>(&session, "certificates", None).unwrap_err();
        assert!(err.to_string().starts_with("Session expired."));
    }
}
