use clearance::workflows::clearance::{
    ApplicationId, CertificateFinalizer, CertificateReference, FinalizerError,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Stand-in for the certificate desk. Issues one serial per application no matter
/// how often it is asked.
#[derive(Default)]
pub(crate) struct InMemoryCertificateDesk {
    issued: Mutex<HashMap<ApplicationId, CertificateReference>>,
    serial: AtomicU64,
}

impl CertificateFinalizer for InMemoryCertificateDesk {
    fn finalize(
        &self,
        application_id: &ApplicationId,
    ) -> Result<CertificateReference, FinalizerError> {
        let mut issued = self
            .issued
            .lock()
            .map_err(|_| FinalizerError::Unavailable("certificate ledger poisoned".to_string()))?;
        let reference = issued
            .entry(application_id.clone())
            .or_insert_with(|| {
                let serial = self.serial.fetch_add(1, Ordering::Relaxed) + 1;
                CertificateReference(format!("NOC-{serial:05}-{application_id}"))
            })
            .clone();
        Ok(reference)
    }
}

impl InMemoryCertificateDesk {
    pub(crate) fn issued_count(&self) -> usize {
        self.issued.lock().map(|issued| issued.len()).unwrap_or_default()
    }
}
