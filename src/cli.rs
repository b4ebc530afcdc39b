// Flag surface and top-level control flow. One binary covers both
// service variants: the anonymous kiosk call and the OAuth1.0a-signed
// call, selected by `--auth` (or implied by the credential flags).

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use crate::api::ApiClient;
use crate::config::FileStore;
use crate::error::Error;
use crate::oauth::{ConsolePrompt, Lifecycle, RestTokenService};
use crate::organisms;
use crate::prediction::{normalize, PredictionRow};
use crate::report;

const DEFAULT_BASE_URL: &str = "https://rest.pubmlst.org";
const KIOSK_DB: &str = "pubmlst_rmlst_seqdef_kiosk";
const AUTH_DB: &str = "pubmlst_rmlst_seqdef";

#[derive(Parser, Debug)]
#[command(
    name = "rmlst",
    version,
    about = "Upload an assembly to the PubMLST rMLST species identifier and report the prediction"
)]
pub struct Cli {
    /// Assembly contig filename (FASTA format)
    #[arg(short, long, required_unless_present = "auth_only")]
    file: Option<PathBuf>,

    /// File path for the output TSV report
    #[arg(short, long, default_value = "rMLST.tsv")]
    output: PathBuf,

    /// YAML file containing supported organisms
    #[arg(short = 'O', long = "organism_file")]
    organism_file: Option<PathBuf>,

    /// Write the species to a txt file if detected among the supported
    /// organisms
    #[arg(short = 's', long = "species_file")]
    species_file: Option<PathBuf>,

    /// HTTP timeout in seconds
    #[arg(long, default_value_t = 120)]
    timeout: u64,

    /// Target database (defaults to the kiosk database, or the main
    /// rMLST database when signing)
    #[arg(long)]
    db: Option<String>,

    /// REST API root
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Sign requests with OAuth1.0a instead of using the anonymous kiosk
    #[arg(long)]
    auth: bool,

    /// OAuth consumer key (stored in the credential file)
    #[arg(long = "consumer-key")]
    consumer_key: Option<String>,

    /// OAuth consumer secret (stored in the credential file)
    #[arg(long = "consumer-secret")]
    consumer_secret: Option<String>,

    /// Set up and verify credentials, then exit without uploading
    #[arg(long = "auth-only")]
    auth_only: bool,
}

fn local_io(err: anyhow::Error) -> Error {
    Error::Configuration(format!("{err:#}"))
}

fn upload_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}").unwrap());
    spinner.set_message("Uploading sequence...");
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

impl Cli {
    fn signed(&self) -> bool {
        self.auth || self.auth_only || self.consumer_key.is_some() || self.consumer_secret.is_some()
    }

    fn database(&self) -> String {
        match &self.db {
            Some(db) => db.clone(),
            None if self.signed() => AUTH_DB.to_string(),
            None => KIOSK_DB.to_string(),
        }
    }

    fn read_fasta(&self) -> Result<String, Error> {
        let path = self
            .file
            .as_ref()
            .ok_or_else(|| Error::Configuration("an input FASTA file is required (-f)".into()))?;
        log::info!("Encoding fasta {}", path.display());
        std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("failed to read {}: {e}", path.display())))
    }

    pub fn run(self) -> Result<(), Error> {
        let db = self.database();
        let timeout = Duration::from_secs(self.timeout);
        if self.signed() {
            self.run_signed(&db, timeout)
        } else {
            self.run_anonymous(&db, timeout)
        }
    }

    /// Anonymous kiosk call. Server-side failures degrade to "no
    /// prediction" here: the body is echoed and an empty report written.
    fn run_anonymous(&self, db: &str, timeout: Duration) -> Result<(), Error> {
        let fasta = self.read_fasta()?;
        let client = ApiClient::new(&self.base_url, db, timeout)?;
        let spinner = upload_spinner();
        let response = client.submit(&fasta, None);
        spinner.finish_and_clear();
        let response = response?;

        let rows = if response.is_ok() {
            match response.json() {
                Ok(body) => normalize(&body),
                Err(err) => {
                    log::warn!("{err}");
                    Vec::new()
                }
            }
        } else {
            log::warn!("Server returned {}: {}", response.status, response.text);
            Vec::new()
        };
        self.finish(rows)
    }

    /// OAuth1.0a-signed call against the main database. Unlike the
    /// kiosk, failures here are fatal: an authenticated caller asked for
    /// a result and silent degradation would hide a broken setup.
    fn run_signed(&self, db: &str, timeout: Duration) -> Result<(), Error> {
        let service = RestTokenService::new(&self.base_url, db, timeout)?;
        let mut lifecycle = Lifecycle::new(service, ConsolePrompt, FileStore::default_location());
        let mut record = lifecycle.load_record()?;
        if let Some(key) = &self.consumer_key {
            record.consumer_key = Some(key.clone());
        }
        if let Some(secret) = &self.consumer_secret {
            record.consumer_secret = Some(secret.clone());
        }
        lifecycle.ensure_access_token(&mut record)?;

        if self.auth_only {
            if record.session_usable() {
                log::info!("Existing session token is still within its lifetime");
            }
            lifecycle.refresh_session_token(&mut record)?;
            println!("Credentials verified; a fresh session token is on file.");
            return Ok(());
        }

        let fasta = self.read_fasta()?;
        let client = ApiClient::new(&self.base_url, db, timeout)?;
        let spinner = upload_spinner();
        let result = lifecycle.call_protected(&mut record, |signer| client.submit(&fasta, Some(signer)));
        spinner.finish_and_clear();
        let response = result?;

        if !response.is_ok() {
            return Err(Error::Transport(format!(
                "server returned {}: {}",
                response.status, response.text
            )));
        }
        let rows = normalize(&response.json()?);
        self.finish(rows)
    }

    /// Shared tail of both variants: organism matching, label file,
    /// report. The report is always written, header-only when empty.
    fn finish(&self, rows: Vec<PredictionRow>) -> Result<(), Error> {
        if rows.is_empty() {
            println!("No match");
        } else {
            log::info!("Collecting results ({} predictions)", rows.len());
        }

        match (&self.organism_file, &self.species_file) {
            (Some(organism_file), species_file) => {
                match organisms::load_supported(organism_file) {
                    Ok(supported) => match organisms::best_match(&supported, &rows) {
                        Some(label) => {
                            println!("Supported organism detected: {label}");
                            if let Some(path) = species_file {
                                report::write_label(&label, path).map_err(local_io)?;
                            }
                        }
                        None => {
                            if !rows.is_empty() {
                                println!("Organism not supported by AMRFinderPlus.");
                            }
                        }
                    },
                    // A bad organism file downgrades to "no supported
                    // set"; the run still produces its report.
                    Err(err) => log::warn!("Ignoring organism file: {err:#}"),
                }
            }
            (None, Some(path)) => {
                if let Some(label) = organisms::unsupervised_label(&rows) {
                    report::write_label(&label, path).map_err(local_io)?;
                }
            }
            (None, None) => {}
        }

        report::write_table(&rows, &self.output).map_err(local_io)?;
        log::info!("Wrote {}", self.output.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn base_cli(dir: &Path) -> Cli {
        Cli {
            file: None,
            output: dir.join("out/rMLST.tsv"),
            organism_file: None,
            species_file: None,
            timeout: 120,
            db: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            auth: false,
            consumer_key: None,
            consumer_secret: None,
            auth_only: false,
        }
    }

    fn coli_rows() -> Vec<PredictionRow> {
        normalize(&json!({
            "taxon_prediction": [
                {"rank": 1, "taxon": "Escherichia coli", "support": 92.3}
            ]
        }))
    }

    #[test]
    fn missing_file_is_a_usage_error_unless_auth_only() {
        assert!(Cli::try_parse_from(["rmlst"]).is_err());
        assert!(Cli::try_parse_from(["rmlst", "--auth-only"]).is_ok());
        assert!(Cli::try_parse_from(["rmlst", "-f", "contigs.fa"]).is_ok());
    }

    #[test]
    fn defaults_match_the_original_tool() {
        let cli = Cli::try_parse_from(["rmlst", "-f", "contigs.fa"]).unwrap();
        assert_eq!(cli.output, PathBuf::from("rMLST.tsv"));
        assert_eq!(cli.timeout, 120);
        assert!(!cli.signed());
        assert_eq!(cli.database(), KIOSK_DB);
    }

    #[test]
    fn credential_flags_imply_the_signed_variant() {
        let cli =
            Cli::try_parse_from(["rmlst", "-f", "a.fa", "--consumer-key", "ck"]).unwrap();
        assert!(cli.signed());
        assert_eq!(cli.database(), AUTH_DB);

        let cli = Cli::try_parse_from(["rmlst", "-f", "a.fa", "--auth", "--db", "custom"]).unwrap();
        assert_eq!(cli.database(), "custom");
    }

    #[test]
    fn matched_run_writes_report_and_species_file() {
        let dir = tempfile::tempdir().unwrap();
        let organism_file = dir.path().join("organisms.yaml");
        std::fs::write(&organism_file, "amrfinder:\n  - Escherichia\n").unwrap();

        let mut cli = base_cli(dir.path());
        cli.organism_file = Some(organism_file);
        cli.species_file = Some(dir.path().join("species.txt"));
        cli.finish(coli_rows()).unwrap();

        let table = std::fs::read_to_string(&cli.output).unwrap();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("Escherichia\tcoli\tE. coli\t92.3"));
        let species = std::fs::read_to_string(cli.species_file.as_ref().unwrap()).unwrap();
        assert_eq!(species, "Escherichia");
    }

    #[test]
    fn no_prediction_writes_header_only_and_no_species_file() {
        let dir = tempfile::tempdir().unwrap();
        let organism_file = dir.path().join("organisms.yaml");
        std::fs::write(&organism_file, "- Escherichia\n").unwrap();

        let mut cli = base_cli(dir.path());
        cli.organism_file = Some(organism_file);
        cli.species_file = Some(dir.path().join("species.txt"));
        cli.finish(normalize(&json!({"message": "no match"}))).unwrap();

        let table = std::fs::read_to_string(&cli.output).unwrap();
        assert_eq!(table.lines().count(), 1, "header only");
        assert!(!cli.species_file.as_ref().unwrap().exists());
    }

    #[test]
    fn species_file_without_organism_file_gets_the_unsupervised_label() {
        let dir = tempfile::tempdir().unwrap();
        let mut cli = base_cli(dir.path());
        cli.species_file = Some(dir.path().join("species.txt"));
        cli.finish(coli_rows()).unwrap();

        let species = std::fs::read_to_string(cli.species_file.as_ref().unwrap()).unwrap();
        assert_eq!(species, "E. coli");
    }

    #[test]
    fn unreadable_organism_file_degrades_to_a_plain_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut cli = base_cli(dir.path());
        cli.organism_file = Some(dir.path().join("does-not-exist.yaml"));
        cli.species_file = Some(dir.path().join("species.txt"));
        cli.finish(coli_rows()).unwrap();

        assert!(cli.output.is_file());
        assert!(!cli.species_file.as_ref().unwrap().exists());
    }

    #[test]
    fn unsupported_organism_writes_report_but_no_species_file() {
        let dir = tempfile::tempdir().unwrap();
        let organism_file = dir.path().join("organisms.yaml");
        std::fs::write(&organism_file, "- Klebsiella\n").unwrap();

        let mut cli = base_cli(dir.path());
        cli.organism_file = Some(organism_file);
        cli.species_file = Some(dir.path().join("species.txt"));
        cli.finish(coli_rows()).unwrap();

        assert!(cli.output.is_file());
        assert!(!cli.species_file.as_ref().unwrap().exists());
    }
}
