//! View-side state shared by the pages that consume the API

use crate::types::{Certificate, Scan};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Lifetime of a mounted view
///
/// Results of requests started by a view are applied only while its scope is
/// active. Closing the scope does not abort the request; the result is
/// dropped when it arrives.
#[derive(Debug, Default)]
pub struct ViewScope {
    token: CancellationToken,
}

impl ViewScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for tasks spawned by this view
    pub fn handle(&self) -> ViewHandle {
        ViewHandle {
            token: self.token.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Unmount the view
    pub fn close(&self) {
        self.token.cancel();
    }
}

impl Drop for ViewScope {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[derive(Debug, Clone)]
pub struct ViewHandle {
    token: CancellationToken,
}

impl ViewHandle {
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Await `request` to completion and hand back its output only if the
    /// view is still mounted
    pub async fn settle<F: Future>(&self, request: F) -> Option<F::Output> {
        let output = request.await;
        self.is_active().then_some(output)
    }
}

/// Certificates shown on the certification page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateList {
    items: Vec<Certificate>,
}

impl CertificateList {
    pub const fn new(items: Vec<Certificate>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[Certificate] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append freshly uploaded certificates
    pub fn extend(&mut self, uploaded: impl IntoIterator<Item = Certificate>) {
        self.items.extend(uploaded);
    }

    /// Drop a certificate after the API confirmed its deletion
    pub fn remove(&mut self, reference: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|c| c.reference_number != reference);
        self.items.len() != before
    }

    /// Case-insensitive match on file name or reference number
    pub fn filter(&self, term: &str) -> Vec<&Certificate> {
        let term = term.to_lowercase();
        self.items
            .iter()
            .filter(|c| {
                c.original_name.to_lowercase().contains(&term)
                    || c.reference_number.to_lowercase().contains(&term)
            })
            .collect()
    }
}

/// Dashboard counters derived from the scan history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
}

impl ScanSummary {
    pub fn from_scans(scans: &[Scan]) -> Self {
        let total = scans.len();
        let valid = scans.iter().filter(|s| s.is_valid()).count();
        Self {
            total,
            valid,
            invalid: total - valid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert(reference: &str, name: &str) -> Certificate {
        Certificate {
            reference_number: reference.into(),
            original_name: name.into(),
            processed_path: None,
            status: None,
        }
    }

    fn scan(status: &str) -> Scan {
        Scan {
            id: None,
            certif_name: None,
            status: status.into(),
            scanned_at: None,
        }
    }

    #[test]
    fn test_remove_deleted_certificate() {
        let mut list = CertificateList::new(vec![
            cert("REF123", "diploma.pdf"),
            cert("REF456", "transcript.pdf"),
        ]);

        assert!(list.remove("REF123"));
        assert_eq!(list.len(), 1);
        assert_eq!(list.items()[0].reference_number, "REF456");
        assert!(!list.remove("REF123"));
    }

    #[test]
    fn test_extend_and_filter() {
        let mut list = CertificateList::default();
        list.extend(vec![cert("REF1", "Diploma.PDF"), cert("ABC2", "other.pdf")]);

        assert_eq!(list.filter("diploma").len(), 1);
        assert_eq!(list.filter("abc").len(), 1);
        assert_eq!(list.filter("").len(), 2);
        assert!(list.filter("zzz").is_empty());
    }

    #[test]
    fn test_scan_summary() {
        let summary = ScanSummary::from_scans(&[scan("valide"), scan("invalide"), scan("valide")]);
        assert_eq!(
            summary,
            ScanSummary {
                total: 3,
                valid: 2,
                invalid: 1
            }
        );
        assert_eq!(ScanSummary::from_scans(&[]), ScanSummary::default());
    }

    #[tokio::test]
    async fn test_results_dropped_after_view_closes() {
        let scope = ViewScope::new();
        let handle = scope.handle();
        assert_eq!(handle.settle(async { 1 }).await, Some(1));

        scope.close();
        assert!(!scope.is_active());
        assert_eq!(handle.settle(async { 2 }).await, None);
    }

    #[tokio::test]
    async fn test_dropping_scope_deactivates_handles() {
        let handle = ViewScope::new().handle();
        assert!(!handle.is_active());
        assert_eq!(handle.settle(async { "late" }).await, None);
    }
}
