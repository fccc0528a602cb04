use serde::{Deserialize, Serialize};

/// High-water marks: every row with an id at or below a cursor has been
/// observed. `change_log` is the checkpoint into the change log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursors {
    pub peptide: i64,
    pub ms_data_file: i64,
    pub peptide_analysis: i64,
    pub change_log: i64,
}

impl Cursors {
    /// Moves every cursor up to `observed`; cursors never move backwards.
    pub fn advance(&mut self, observed: &Cursors) {
        self.peptide = self.peptide.max(observed.peptide);
        self.ms_data_file = self.ms_data_file.max(observed.ms_data_file);
        self.peptide_analysis = self.peptide_analysis.max(observed.peptide_analysis);
        self.change_log = self.change_log.max(observed.change_log);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cursors() -> impl Strategy<Value = Cursors> {
        (0i64..1000, 0i64..1000, 0i64..1000, 0i64..1000).prop_map(|(p, f, a, c)| Cursors {
            peptide: p,
            ms_data_file: f,
            peptide_analysis: a,
            change_log: c,
        })
    }

    proptest! {
        #[test]
        fn advance_never_regresses(start in cursors(), steps in prop::collection::vec(cursors(), 0..20)) {
            let mut current = start;
            for observed in &steps {
                let before = current;
                current.advance(observed);
                prop_assert!(current.peptide >= before.peptide);
                prop_assert!(current.ms_data_file >= before.ms_data_file);
                prop_assert!(current.peptide_analysis >= before.peptide_analysis);
                prop_assert!(current.change_log >= before.change_log);
                prop_assert!(current.peptide >= observed.peptide);
            }
        }
    }
}
