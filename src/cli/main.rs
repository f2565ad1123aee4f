use clap::{Parser, Subcommand};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use std::error::Error;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "pcos-cli")]
#[command(about = "PCOS screening service CLI", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8000")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health
    Health,

    /// Score a simple questionnaire
    Simple {
        /// JSON file with the questionnaire answers
        #[arg(short, long)]
        payload: PathBuf,
    },

    /// Score a clinical questionnaire
    Clinical {
        /// JSON file with the clinical measurements
        #[arg(short, long)]
        payload: PathBuf,
    },

    /// Score an ultrasound image
    Image {
        #[arg(short, long)]
        file: PathBuf,

        /// MIME type sent with the upload (guessed from the extension by default)
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Score an ultrasound image together with clinical measurements
    Combined {
        #[arg(short, long)]
        file: PathBuf,

        /// JSON file with the 19 clinical measurements
        #[arg(short, long)]
        clinical: PathBuf,

        #[arg(long)]
        content_type: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let client = Client::new();
    let endpoint = cli.endpoint.trim_end_matches('/');

    let response = match cli.command {
        Commands::Health => client.get(format!("{}/health", endpoint)).send().await?,

        Commands::Simple { payload } => {
            let body = read_json(&payload)?;
            client
                .post(format!("{}/predict/simple", endpoint))
                .json(&body)
                .send()
                .await?
        }

        Commands::Clinical { payload } => {
            let body = read_json(&payload)?;
            client
                .post(format!("{}/predict/clinical", endpoint))
                .json(&body)
                .send()
                .await?
        }

        Commands::Image { file, content_type } => {
            let form = Form::new().part("image", image_part(&file, content_type)?);
            client
                .post(format!("{}/predict/image", endpoint))
                .multipart(form)
                .send()
                .await?
        }

        Commands::Combined {
            file,
            clinical,
            content_type,
        } => {
            // Sent as a text field; the server parses and validates it
            let clinical = std::fs::read_to_string(&clinical)?;
            let form = Form::new()
                .part("image", image_part(&file, content_type)?)
                .text("clinical", clinical);
            client
                .post(format!("{}/predict/combined", endpoint))
                .multipart(form)
                .send()
                .await?
        }
    };

    print_response(response).await
}

fn read_json(path: &Path) -> Result<serde_json::Value, Box<dyn Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn image_part(path: &Path, content_type: Option<String>) -> Result<Part, Box<dyn Error>> {
    let bytes = std::fs::read(path)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let mime = content_type.unwrap_or_else(|| guess_mime(path).to_string());

    Ok(Part::bytes(bytes).file_name(file_name).mime_str(&mime)?)
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

async fn print_response(response: Response) -> Result<(), Box<dyn Error>> {
    let status = response.status();
    let body: serde_json::Value = response.json().await?;

    if status.is_success() {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let detail = body
        .get("detail")
        .and_then(|d| d.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());
    eprintln!("Error ({}): {}", status.as_u16(), detail);
    std::process::exit(1);
}
