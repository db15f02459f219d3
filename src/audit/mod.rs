//! Evidence fingerprinting
//!
//! Every Answer carries a SHA-256 fingerprint of the evidence it was
//! grounded on, so identical evidence is recognisable across requests
//! regardless of how the answer text was worded.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Write;

use crate::models::{EvidenceSet, Intent, TaskId, TaskOutput, TaskResult};

/// Canonical view: the intent plus every successful task output, in task order.
/// Failures are excluded; they carry upstream error text that varies between runs.
#[derive(Serialize)]
struct FingerprintView<'a> {
    intent: &'a Intent,
    facts: Vec<(&'a TaskId, &'a TaskOutput)>,
}

/// Compute SHA256 hash of the successful evidence fields
/// Uses zero-copy streaming serialization into hasher
pub fn compute_evidence_hash(evidence: &EvidenceSet) -> String {
    let view = FingerprintView {
        intent: evidence.intent(),
        facts: evidence
            .entries()
            .iter()
            .filter_map(|e| match &e.result {
                TaskResult::Success(output) => Some((&e.task.id, output)),
                TaskResult::Failure(_) => None,
            })
            .collect(),
    };

    let mut hasher = Sha256::new();

    // Stream JSON directly into hasher (no intermediate String)
    if serde_json::to_writer(&mut HashWriter(&mut hasher), &view).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
