/// The fixed experiment-name -> config-path table known to the batch
/// driver, injected into components rather than looked up globally.
#[derive(Debug, Clone)]
pub struct ExperimentTable {
    entries: Vec<(String, String)>,
}

/// Outcome of resolving an operator-supplied selection against the table.
/// Unknown names are reported, never fatal to the batch.
#[derive(Debug, Default)]
pub struct Selection {
    pub selected: Vec<(String, String)>,
    pub unknown: Vec<String>,
}

impl ExperimentTable {
    /// The four main KTO experiments.
    pub fn main_experiments() -> Self {
        Self::new([
            ("therapy-talk", "therapy-talk/therapy.yaml"),
            ("booking-assistance", "booking-assistance/booking.yaml"),
            ("action-advice", "action-advice/action.yaml"),
            ("politics-questions", "politics-questions/political.yaml"),
        ])
    }

    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn config_for(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a selection, preserving table order. An empty selection or
    /// a literal `all` selects every entry.
    pub fn resolve(&self, selection: &[String]) -> Selection {
        if selection.is_empty() || selection.iter().any(|s| s == "all") {
            return Selection {
                selected: self.entries.clone(),
                unknown: Vec::new(),
            };
        }

        let mut out = Selection::default();
        for name in selection {
            match self.config_for(name) {
                Some(config) => out.selected.push((name.clone(), config.to_string())),
                None => out.unknown.push(name.clone()),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_table_has_four_entries() {
        let table = ExperimentTable::main_experiments();
        assert_eq!(table.len(), 4);
        assert_eq!(
            table.config_for("therapy-talk"),
            Some("therapy-talk/therapy.yaml")
        );
        assert_eq!(
            table.config_for("politics-questions"),
            Some("politics-questions/political.yaml")
        );
    }

    #[test]
    fn empty_or_all_selects_everything() {
        let table = ExperimentTable::main_experiments();
        assert_eq!(table.resolve(&[]).selected.len(), 4);
        assert_eq!(table.resolve(&["all".to_string()]).selected.len(), 4);
    }

    #[test]
    fn unknown_names_are_reported_not_fatal() {
        let table = ExperimentTable::main_experiments();
        let selection = table.resolve(&["therapy-talk".to_string(), "bogus-name".to_string()]);
        assert_eq!(selection.selected.len(), 1);
        assert_eq!(selection.selected[0].0, "therapy-talk");
        assert_eq!(selection.unknown, vec!["bogus-name".to_string()]);
    }
}
