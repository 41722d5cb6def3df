//! Tab + search + security-type projection over the stream collection.
//! Batch operations resolve their target set through this filter, so what
//! the desk sees is exactly what a batch touches.

use serde::{Deserialize, Serialize};

use crate::model::{SecurityType, StreamSet};
use crate::stream_fsm::StreamState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tab {
    #[default]
    All,
    Active,
    Paused,
    Halted,
    Staged,
    Unconfigured,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewFilter {
    #[serde(default)]
    pub tab: Tab,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub security_type: Option<SecurityType>,
}

impl ViewFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches(&self, stream: &StreamSet) -> bool {
        let tab_ok = match self.tab {
            Tab::All => true,
            Tab::Active => stream.display_status() == StreamState::Active,
            Tab::Paused => stream.display_status() == StreamState::Paused,
            Tab::Halted => stream.display_status() == StreamState::Halted,
            Tab::Staged => stream.has_staging_changes,
            Tab::Unconfigured => stream.state == StreamState::Unconfigured,
        };
        if !tab_ok {
            return false;
        }

        if let Some(kind) = self.security_type {
            if stream.security_type != kind {
                return false;
            }
        }

        match &self.search {
            Some(term) if !term.trim().is_empty() => {
                let needle = term.trim().to_lowercase();
                stream.id.to_lowercase().contains(&needle)
                    || stream.security_id.to_lowercase().contains(&needle)
                    || stream.security_name.to_lowercase().contains(&needle)
            }
            _ => true,
        }
    }
}

/// Project the collection through a filter, sorted by security id then
/// stream id (stable across re-renders).
pub fn filter_streams<'a>(streams: &'a [StreamSet], filter: &ViewFilter) -> Vec<&'a StreamSet> {
    let mut out: Vec<&StreamSet> = streams.iter().filter(|s| filter.matches(s)).collect();
    out.sort_by(|a, b| {
        a.security_id
            .cmp(&b.security_id)
            .then_with(|| a.id.cmp(&b.id))
    });
    out
}

/// Ids only, for batch target resolution.
pub fn filter_stream_ids(streams: &[StreamSet], filter: &ViewFilter) -> Vec<String> {
    filter_streams(streams, filter)
        .into_iter()
        .map(|s| s.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds;
    use crate::model::PriceSource;

    fn collection() -> Vec<StreamSet> {
        let mut a = feeds::build_stream(
            "s-1",
            "AU-GOV-10Y",
            "Treasury 2034",
            SecurityType::GovernmentBond,
            3,
            vec![],
        );
        a.selected_price_source = Some(PriceSource::Manual);
        a.state = StreamState::Staging;

        let mut b = feeds::build_stream(
            "s-2",
            "AU-CORP-5Y",
            "Corp Note 2029",
            SecurityType::CorporateBond,
            3,
            vec![],
        );
        b.selected_price_source = Some(PriceSource::Manual);
        b.state = StreamState::Staging;
        b.has_staging_changes = true;

        let c = feeds::build_stream(
            "s-3",
            "AU-BILL-90D",
            "Bank Bill",
            SecurityType::Bill,
            1,
            vec![],
        );

        vec![b, c, a]
    }

    #[test]
    fn all_tab_sorts_by_security_id() {
        let streams = collection();
        let ids: Vec<&str> = filter_streams(&streams, &ViewFilter::all())
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ids, vec!["s-3", "s-2", "s-1"]);
    }

    #[test]
    fn search_is_case_insensitive() {
        let streams = collection();
        let filter = ViewFilter {
            search: Some("corp".into()),
            ..Default::default()
        };
        let ids = filter_stream_ids(&streams, &filter);
        assert_eq!(ids, vec!["s-2".to_string()]);
    }

    #[test]
    fn staged_tab_selects_staged_streams_only() {
        let streams = collection();
        let filter = ViewFilter {
            tab: Tab::Staged,
            ..Default::default()
        };
        assert_eq!(filter_stream_ids(&streams, &filter), vec!["s-2".to_string()]);
    }

    #[test]
    fn security_type_narrows_the_projection() {
        let streams = collection();
        let filter = ViewFilter {
            security_type: Some(SecurityType::Bill),
            ..Default::default()
        };
        assert_eq!(filter_stream_ids(&streams, &filter), vec!["s-3".to_string()]);
    }

    #[test]
    fn unconfigured_tab_uses_lifecycle_state() {
        let streams = collection();
        let filter = ViewFilter {
            tab: Tab::Unconfigured,
            ..Default::default()
        };
        assert_eq!(filter_stream_ids(&streams, &filter), vec!["s-3".to_string()]);
    }
}
