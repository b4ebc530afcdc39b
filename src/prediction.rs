// Turns the service's nested `taxon_prediction` list into flat rows.
// The service is loose about numeric types (rank and support may arrive
// as numbers or strings), so every field is carried as text.

use serde_json::Value;

/// One entry of the ranked prediction list. Created fresh per
/// invocation, never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionRow {
    pub rank: String,
    pub taxon: String,
    pub genus: String,
    pub species: String,
    pub abbreviated: String,
    pub support: String,
    pub taxonomy: String,
}

impl PredictionRow {
    /// Rank as a number for ordering; non-numeric ranks sort last.
    pub fn rank_value(&self) -> f64 {
        self.rank.trim().parse().unwrap_or(f64::INFINITY)
    }
}

/// Render a loosely-typed JSON field as plain text: strings verbatim,
/// numbers without quotes, anything missing as empty.
fn field_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Flatten `body["taxon_prediction"]` into rows, preserving the
/// service's order. An absent or empty list yields no rows and is not
/// an error.
pub fn normalize(body: &Value) -> Vec<PredictionRow> {
    let entries = match body.get("taxon_prediction").and_then(Value::as_array) {
        Some(entries) => entries,
        None => return Vec::new(),
    };
    entries
        .iter()
        .map(|entry| {
            let taxon = field_text(entry.get("taxon"));
            let mut tokens = taxon.split_whitespace();
            let genus = tokens.next().unwrap_or("").to_string();
            let species = tokens.next().unwrap_or("").to_string();
            let abbreviated = abbreviate(&taxon, &genus, &species);
            PredictionRow {
                rank: field_text(entry.get("rank")),
                taxon,
                genus,
                species,
                abbreviated,
                support: field_text(entry.get("support")),
                taxonomy: field_text(entry.get("taxonomy")),
            }
        })
        .collect()
}

/// "E. coli" when both parts are present; a taxon with fewer than two
/// tokens falls back to its raw text.
fn abbreviate(taxon: &str, genus: &str, species: &str) -> String {
    match (genus.chars().next(), species.is_empty()) {
        (Some(initial), false) => format!("{initial}. {species}"),
        _ => taxon.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derives_genus_species_and_abbreviation() {
        let body = json!({
            "taxon_prediction": [
                {"rank": 1, "taxon": "Escherichia coli", "support": 92.3,
                 "taxonomy": "Bacteria > Proteobacteria"}
            ]
        });
        let rows = normalize(&body);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.rank, "1");
        assert_eq!(row.taxon, "Escherichia coli");
        assert_eq!(row.genus, "Escherichia");
        assert_eq!(row.species, "coli");
        assert_eq!(row.abbreviated, "E. coli");
        assert_eq!(row.support, "92.3");
        assert_eq!(row.taxonomy, "Bacteria > Proteobacteria");
    }

    #[test]
    fn extra_taxon_tokens_are_ignored_for_derivations() {
        let body = json!({
            "taxon_prediction": [
                {"rank": 1, "taxon": "Salmonella enterica subsp. enterica", "support": 80}
            ]
        });
        let row = &normalize(&body)[0];
        assert_eq!(row.genus, "Salmonella");
        assert_eq!(row.species, "enterica");
        assert_eq!(row.abbreviated, "S. enterica");
    }

    #[test]
    fn single_token_taxon_falls_back_to_raw_text() {
        let body = json!({
            "taxon_prediction": [
                {"rank": "1", "taxon": "Shigella", "support": "55"}
            ]
        });
        let row = &normalize(&body)[0];
        assert_eq!(row.genus, "Shigella");
        assert_eq!(row.species, "");
        assert_eq!(row.abbreviated, "Shigella");
    }

    #[test]
    fn missing_prediction_key_yields_no_rows() {
        assert!(normalize(&json!({"message": "no match"})).is_empty());
        assert!(normalize(&json!({"taxon_prediction": []})).is_empty());
    }

    #[test]
    fn input_order_is_preserved() {
        let body = json!({
            "taxon_prediction": [
                {"rank": 2, "taxon": "Escherichia fergusonii", "support": 8},
                {"rank": 1, "taxon": "Escherichia coli", "support": 92},
            ]
        });
        let rows = normalize(&body);
        assert_eq!(rows[0].taxon, "Escherichia fergusonii");
        assert_eq!(rows[1].taxon, "Escherichia coli");
    }

    #[test]
    fn non_numeric_rank_sorts_last() {
        let row = PredictionRow {
            rank: "n/a".into(),
            taxon: String::new(),
            genus: String::new(),
            species: String::new(),
            abbreviated: String::new(),
            support: String::new(),
            taxonomy: String::new(),
        };
        assert_eq!(row.rank_value(), f64::INFINITY);
    }

    #[test]
    fn absent_taxonomy_becomes_empty_text() {
        let body = json!({
            "taxon_prediction": [{"rank": 1, "taxon": "Escherichia coli", "support": 92}]
        });
        assert_eq!(normalize(&body)[0].taxonomy, "");
    }
}
