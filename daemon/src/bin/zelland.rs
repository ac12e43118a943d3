// zelland trigger CLI
// Asks the local daemon to show a file on the connected device

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use zelland_lib::daemon::protocol::{ShowRequest, TRIGGER_MD_PATH, TRIGGER_SHOW_PATH};

#[derive(Parser, Debug)]
#[command(name = "zelland", about = "Send files to the zelland device", version)]
struct Cli {
    /// Daemon base URL
    #[arg(long, global = true, default_value = "http://localhost:8083")]
    url: String,

    /// Accept self-signed daemon certificates
    #[arg(long, global = true)]
    insecure: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Display an image on the device
    Show {
        file: PathBuf,
        /// Title shown on the device (defaults to the file name)
        #[arg(long)]
        title: Option<String>,
    },
    /// Open a markdown document for annotation
    Md {
        file: PathBuf,
        #[arg(long)]
        title: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (endpoint, file, title) = match &cli.command {
        Command::Show { file, title } => (TRIGGER_SHOW_PATH, file, title),
        Command::Md { file, title } => (TRIGGER_MD_PATH, file, title),
    };

    let request = build_request(file, title.as_deref())?;
    let url = format!("{}{}", cli.url.trim_end_matches('/'), endpoint);

    let client = reqwest::blocking::Client::builder()
        .danger_accept_invalid_certs(cli.insecure)
        .build()
        .context("Failed to build HTTP client")?;

    let response = client
        .post(&url)
        .json(&request)
        .send()
        .with_context(|| format!("Failed to reach daemon at {} (is zellandd running?)", cli.url))?;

    let status = response.status();
    let body = response.text().unwrap_or_default();
    if !status.is_success() {
        eprintln!("Error from daemon (status {}): {}", status.as_u16(), body.trim());
        std::process::exit(1);
    }

    println!("{}", body.trim());
    Ok(())
}

fn build_request(file: &Path, title: Option<&str>) -> Result<ShowRequest> {
    let absolute = std::path::absolute(file)
        .with_context(|| format!("Failed to resolve {}", file.display()))?;
    let title = match title {
        Some(title) => title.to_string(),
        None => file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };

    // The daemon resolves this path verbatim, so it must survive the JSON round trip
    let file_path = absolute
        .to_str()
        .ok_or_else(|| anyhow!("Path is not valid UTF-8: {}", absolute.display()))?
        .to_string();

    Ok(ShowRequest { file_path, title })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_makes_path_absolute() {
        let request = build_request(Path::new("notes/report.md"), None).unwrap();
        assert!(Path::new(&request.file_path).is_absolute());
        assert!(request.file_path.ends_with("report.md"));
        assert_eq!(request.title, "report.md");
    }

    #[cfg(unix)]
    #[test]
    fn test_build_request_keeps_explicit_title() {
        let request = build_request(Path::new("/tmp/a.png"), Some("Diagram")).unwrap();
        assert_eq!(request.file_path, "/tmp/a.png");
        assert_eq!(request.title, "Diagram");
    }

    #[cfg(unix)]
    #[test]
    fn test_build_request_rejects_non_utf8_path() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let file = Path::new("/tmp").join(OsStr::from_bytes(b"\xff.md"));
        let err = build_request(&file, Some("t")).unwrap_err();
        assert!(err.to_string().contains("not valid UTF-8"), "{err}");
    }
}
