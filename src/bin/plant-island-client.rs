use argh::FromArgs;
use plant_island::server::UPLOAD_FIELD;
use reqwest::multipart::{Form, Part};
use std::path::PathBuf;

// defaults for the client
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 3000;

#[derive(FromArgs)]
/// Upload images to a Plant Island server and print the predictions
struct ClientArgs {
    /// the host to connect to
    #[argh(option, short = 'h', default = "DEFAULT_HOST.to_string()")]
    host: String,

    /// the port to connect to
    #[argh(option, short = 'p', default = "DEFAULT_PORT")]
    port: u16,

    /// the images to classify
    #[argh(positional)]
    images: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: ClientArgs = argh::from_env();

    if args.images.is_empty() {
        return Err("at least one image path is required".into());
    }

    let mut form = Form::new();
    for path in &args.images {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        log::debug!("Attaching {} ({} bytes)", filename, bytes.len());
        form = form.part(UPLOAD_FIELD, Part::bytes(bytes).file_name(filename));
    }

    // format the host and port
    let addr = format!("{}:{}", args.host, args.port);

    let response = reqwest::Client::new()
        .post(format!("http://{}/predict/", addr))
        .multipart(form)
        .send()
        .await?;

    let status = response.status();
    let result = response.json::<serde_json::Value>().await?;
    if !status.is_success() {
        log::warn!("Server answered {}", status);
    }
    println!("Result: {}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
