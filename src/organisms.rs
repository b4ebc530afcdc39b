// Supported-organism list and matching. The list comes from a YAML file
// whose shape has varied across pipeline versions: a flat list, a
// mapping with the labels under an `amrfinder` key, or a mapping of
// category names to lists. All of them flatten to one set of labels; a
// label is either a bare genus or a full taxon with underscores for
// spaces.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde_yaml::Value;

use crate::prediction::PredictionRow;

const AMRFINDER_KEY: &str = "amrfinder";

/// Load and flatten the organism file. Callers are expected to degrade
/// to "no supported set" on error rather than abort the run.
pub fn load_supported(path: &Path) -> Result<HashSet<String>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read organism file {}", path.display()))?;
    let value: Value = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse organism file {}", path.display()))?;
    Ok(flatten(&value))
}

/// Collect every string label reachable from the document, honoring the
/// `amrfinder` key when present.
pub fn flatten(value: &Value) -> HashSet<String> {
    match value {
        Value::Mapping(map) => {
            let amrfinder = map
                .iter()
                .find(|(key, _)| key.as_str() == Some(AMRFINDER_KEY))
                .map(|(_, nested)| nested);
            match amrfinder {
                Some(nested) => collect(nested),
                None => map.values().flat_map(collect).collect(),
            }
        }
        other => collect(other),
    }
}

fn collect(value: &Value) -> HashSet<String> {
    let mut labels = HashSet::new();
    match value {
        Value::String(s) => {
            labels.insert(s.clone());
        }
        Value::Sequence(items) => {
            for item in items {
                labels.extend(collect(item));
            }
        }
        Value::Mapping(map) => {
            for nested in map.values() {
                labels.extend(collect(nested));
            }
        }
        _ => {}
    }
    labels
}

/// Top row = numerically smallest rank; ties go to the first
/// occurrence, unparsable ranks sort last.
fn top_row(rows: &[PredictionRow]) -> Option<&PredictionRow> {
    let mut best: Option<&PredictionRow> = None;
    for row in rows {
        match best {
            Some(current) if row.rank_value() < current.rank_value() => best = Some(row),
            None => best = Some(row),
            _ => {}
        }
    }
    best
}

/// Match the top-ranked prediction against the supported set. Genus is
/// the coarser entry kind and is checked first; full taxa are listed
/// with underscores instead of spaces. No match is an absent result,
/// not an error.
pub fn best_match(supported: &HashSet<String>, rows: &[PredictionRow]) -> Option<String> {
    let top = top_row(rows)?;
    if supported.contains(&top.genus) {
        return Some(top.genus.clone());
    }
    let underscored = top.taxon.replace(' ', "_");
    if supported.contains(&underscored) {
        return Some(underscored);
    }
    None
}

/// Fallback label mode used when a species file is requested without an
/// organism file: the top prediction's abbreviated taxon, unchecked.
pub fn unsupervised_label(rows: &[PredictionRow]) -> Option<String> {
    top_row(rows).map(|row| row.abbreviated.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(rank: &str, taxon: &str) -> PredictionRow {
        let mut tokens = taxon.split_whitespace();
        let genus = tokens.next().unwrap_or("").to_string();
        let species = tokens.next().unwrap_or("").to_string();
        let abbreviated = if !genus.is_empty() && !species.is_empty() {
            format!("{}. {}", genus.chars().next().unwrap(), species)
        } else {
            taxon.to_string()
        };
        PredictionRow {
            rank: rank.to_string(),
            taxon: taxon.to_string(),
            genus,
            species,
            abbreviated,
            support: "90".to_string(),
            taxonomy: String::new(),
        }
    }

    fn set(labels: &[&str]) -> HashSet<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flattens_a_flat_list() {
        let value: Value = serde_yaml::from_str("- Escherichia\n- Salmonella_enterica\n").unwrap();
        assert_eq!(flatten(&value), set(&["Escherichia", "Salmonella_enterica"]));
    }

    #[test]
    fn flattens_the_amrfinder_key_only() {
        let doc = "amrfinder:\n  - Escherichia\n  - Klebsiella\nother:\n  - Vibrio\n";
        let value: Value = serde_yaml::from_str(doc).unwrap();
        assert_eq!(flatten(&value), set(&["Escherichia", "Klebsiella"]));
    }

    #[test]
    fn flattens_category_mappings() {
        let doc = "gram_negative:\n  - Escherichia\ngram_positive:\n  - Staphylococcus\n";
        let value: Value = serde_yaml::from_str(doc).unwrap();
        assert_eq!(flatten(&value), set(&["Escherichia", "Staphylococcus"]));
    }

    #[test]
    fn picks_the_numerically_smallest_rank() {
        let rows = vec![
            row("2", "Escherichia fergusonii"),
            row("1", "Escherichia coli"),
            row("3", "Shigella sonnei"),
        ];
        let found = best_match(&set(&["Escherichia"]), &rows);
        assert_eq!(found.as_deref(), Some("Escherichia"));
        // And specifically from the rank-1 row, not the first row.
        assert_eq!(top_row(&rows).unwrap().taxon, "Escherichia coli");
    }

    #[test]
    fn rank_ties_go_to_the_first_occurrence() {
        let rows = vec![row("1", "Escherichia coli"), row("1", "Shigella sonnei")];
        assert_eq!(top_row(&rows).unwrap().taxon, "Escherichia coli");
    }

    #[test]
    fn non_numeric_ranks_sort_last() {
        let rows = vec![row("n/a", "Shigella sonnei"), row("2", "Escherichia coli")];
        assert_eq!(top_row(&rows).unwrap().taxon, "Escherichia coli");
    }

    #[test]
    fn genus_is_checked_before_the_underscored_taxon() {
        let rows = vec![row("1", "Escherichia coli")];
        let supported = set(&["Escherichia", "Escherichia_coli"]);
        assert_eq!(best_match(&supported, &rows).as_deref(), Some("Escherichia"));
    }

    #[test]
    fn falls_back_to_the_underscored_taxon() {
        let rows = vec![row("1", "Salmonella enterica")];
        let supported = set(&["Salmonella_enterica"]);
        assert_eq!(
            best_match(&supported, &rows).as_deref(),
            Some("Salmonella_enterica")
        );
    }

    #[test]
    fn unsupported_organism_yields_none() {
        let rows = vec![row("1", "Vibrio cholerae")];
        assert_eq!(best_match(&set(&["Escherichia"]), &rows), None);
    }

    #[test]
    fn empty_rows_yield_none() {
        assert_eq!(best_match(&set(&["Escherichia"]), &[]), None);
        assert_eq!(unsupervised_label(&[]), None);
    }

    #[test]
    fn unsupervised_label_is_the_top_abbreviated_taxon() {
        let rows = vec![row("2", "Shigella sonnei"), row("1", "Escherichia coli")];
        assert_eq!(unsupervised_label(&rows).as_deref(), Some("E. coli"));
    }
}
