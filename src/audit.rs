//! Audit tooling over the detection history: sample security events for
//! demos, and a risk summary of stored records.

use anyhow::Result;
use serde::Serialize;

use crate::storage::{DetectionRecord, DetectionStore, NewDetectionRecord};

/// Highest value on the risk scale; scores store `risk / RISK_SCALE`.
pub const RISK_SCALE: f32 = 5.0;

/// Spacing between seeded events, newest first.
pub const SEED_SPACING_SECS: u64 = 30 * 60;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SecurityEvent {
    pub labels: Vec<&'static str>,
    /// 1 (routine) to 5 (critical).
    pub risk_level: u8,
    pub zone: &'static str,
    pub summary: &'static str,
}

pub fn sample_security_events() -> Vec<SecurityEvent> {
    vec![
        SecurityEvent {
            labels: vec!["helmet", "safety_vest", "person"],
            risk_level: 1,
            zone: "Zone A: Entry Point",
            summary: "Authorized entry with full protective equipment.",
        },
        SecurityEvent {
            labels: vec!["no_helmet", "person"],
            risk_level: 3,
            zone: "Zone B: Restricted Area",
            summary: "INCIDENT: entry without helmet in restricted area.",
        },
        SecurityEvent {
            labels: vec!["face", "phone", "person"],
            risk_level: 2,
            zone: "Zone C: Assembly Line",
            summary: "Mobile phone use detected on the assembly line.",
        },
        SecurityEvent {
            labels: vec!["person", "intruder_mask"],
            risk_level: 4,
            zone: "Zone D: Storage Vault",
            summary: "CRITICAL ALARM: intruder detected.",
        },
    ]
}

impl SecurityEvent {
    pub fn to_record(&self, created_at: u64) -> NewDetectionRecord {
        NewDetectionRecord {
            created_at,
            image_path: String::new(),
            processed_image_path: None,
            objects_detected: self.labels.iter().map(|l| l.to_string()).collect(),
            confidence_scores: vec![self.risk_level as f32 / RISK_SCALE],
            detection_count: self.labels.len(),
        }
    }
}

/// Store every sample event, the i-th one `i * SEED_SPACING_SECS` before `now`.
pub fn seed(store: &mut dyn DetectionStore, now: u64) -> Result<Vec<(DetectionRecord, SecurityEvent)>> {
    let mut out = Vec::new();
    for (i, event) in sample_security_events().into_iter().enumerate() {
        let created_at = now.saturating_sub(i as u64 * SEED_SPACING_SECS);
        let record = store.insert(&event.to_record(created_at))?;
        log::info!(
            "audit record #{} (risk {}): {}",
            record.id,
            event.risk_level,
            event.summary
        );
        out.push((record, event));
    }
    Ok(out)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RiskReport {
    pub total_records: usize,
    /// Label counts, most frequent first; ties keep first-seen order.
    pub label_frequency: Vec<(String, usize)>,
    /// First scores summed, divided by the record count, on the 1-5 scale.
    pub average_risk: Option<f32>,
}

impl RiskReport {
    pub fn from_records(records: &[DetectionRecord]) -> Self {
        let mut label_frequency: Vec<(String, usize)> = Vec::new();
        for label in records.iter().flat_map(|r| r.objects_detected.iter()) {
            match label_frequency.iter_mut().find(|(l, _)| l == label) {
                Some((_, n)) => *n += 1,
                None => label_frequency.push((label.clone(), 1)),
            }
        }
        // Stable sort keeps first-seen order among equal counts.
        label_frequency.sort_by(|a, b| b.1.cmp(&a.1));

        let firsts: Vec<f32> = records
            .iter()
            .filter_map(|r| r.confidence_scores.first().copied())
            .collect();
        let average_risk = if firsts.is_empty() {
            None
        } else {
            Some(firsts.iter().sum::<f32>() / records.len() as f32 * RISK_SCALE)
        };

        Self {
            total_records: records.len(),
            label_frequency,
            average_risk,
        }
    }

    pub fn load(store: &mut dyn DetectionStore) -> Result<Self> {
        Ok(Self::from_records(&store.all()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryDetectionStore;

    #[test]
    fn seeded_events_report_expected_risk() {
        let mut store = InMemoryDetectionStore::new();
        let seeded = seed(&mut store, 10_000).unwrap();
        assert_eq!(seeded.len(), 4);
        assert_eq!(seeded[3].0.created_at, 10_000 - 3 * SEED_SPACING_SECS);
        assert_eq!(seeded[1].0.confidence_scores, vec![0.6]);

        let report = RiskReport::load(&mut store).unwrap();
        assert_eq!(report.total_records, 4);
        assert_eq!(report.label_frequency[0], ("person".to_string(), 4));
        let avg = report.average_risk.unwrap();
        assert!((avg - 2.5).abs() < 1e-5, "{}", avg);
    }

    #[test]
    fn frequency_ties_keep_first_seen_order() {
        let mut store = InMemoryDetectionStore::new();
        for (t, labels) in [(3u64, vec!["b", "a"]), (2, vec!["a", "c"]), (1, vec!["b"])] {
            store
                .insert(&NewDetectionRecord {
                    created_at: t,
                    image_path: String::new(),
                    processed_image_path: None,
                    detection_count: labels.len(),
                    objects_detected: labels.into_iter().map(String::from).collect(),
                    confidence_scores: vec![],
                })
                .unwrap();
        }
        let report = RiskReport::load(&mut store).unwrap();
        // Newest first: [b, a], [a, c], [b].
        assert_eq!(
            report.label_frequency,
            vec![("b".to_string(), 2), ("a".to_string(), 2), ("c".to_string(), 1)]
        );
        assert_eq!(report.average_risk, None);
    }

    #[test]
    fn empty_history() {
        let report = RiskReport::from_records(&[]);
        assert_eq!(report.total_records, 0);
        assert!(report.label_frequency.is_empty());
        assert!(report.average_risk.is_none());
    }
}
