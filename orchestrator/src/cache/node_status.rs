//! Last known connectivity per node

use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::node::ProbeReport;

/// In-memory cache of the latest probe report for each node
#[derive(Default)]
pub struct NodeStatusCache {
    entries: RwLock<HashMap<String, ProbeReport>>,
}

impl NodeStatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// All reports, ordered by node id
    pub fn all(&self) -> Vec<ProbeReport> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut reports: Vec<ProbeReport> = entries.values().cloned().collect();
        reports.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        reports
    }

    pub fn record(&self, report: ProbeReport) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(report.node_id.clone(), report);
    }

    pub fn record_all(&self, reports: impl IntoIterator<Item = ProbeReport>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for report in reports {
            entries.insert(report.node_id.clone(), report);
        }
    }

    pub fn remove(&self, node_id: &str) -> Option<ProbeReport> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(node_id)
    }
}
