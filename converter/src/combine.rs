// combine.rs — Merge runs of consecutive drifts
//
// Optional pass (--combine-drifts). A run of adjacent drift records becomes
// one record with the summed length, the first non-empty name and the id of
// the first drift. Drifts lending their length to a collimator and negative
// drifts are never merged.

use std::collections::HashSet;

use crate::id::RecordId;
use crate::record::{ElementKind, ElementRecord};

pub fn combine_drifts(records: &[ElementRecord]) -> Vec<ElementRecord> {
    let lenders: HashSet<RecordId> = records
        .iter()
        .filter_map(|r| match &r.kind {
            ElementKind::Collimator(def) => def.length_from,
            _ => None,
        })
        .collect();

    let mut out = Vec::with_capacity(records.len());
    let mut pending: Option<ElementRecord> = None;
    for record in records {
        let mergeable = record.is_drift() && record.length >= 0.0 && !lenders.contains(&record.id);
        if !mergeable {
            out.extend(pending.take());
            out.push(record.clone());
            continue;
        }
        match pending.as_mut() {
            Some(run) => {
                run.set_length(run.length + record.length);
                if run.name.is_empty() {
                    run.name = record.name.clone();
                }
            }
            None => pending = Some(record.clone()),
        }
    }
    out.extend(pending);

    tracing::debug!(before = records.len(), after = out.len(), "drifts combined");
    out
}
