//! Video background removal CLI
//!
//! Command-line front end for the video-bgremove segmentation pipeline.

#[cfg(feature = "cli")]
use video_bgremove::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
