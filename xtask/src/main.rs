use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for veinmine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// fmt, clippy, tests and docs, stopping at the first failure
    Check,
    Fmt,
    Clippy,
    /// Run tests for the workspace or one package
    Test {
        #[arg(short, long)]
        package: Option<String>,
        /// Show test output
        #[arg(long)]
        nocapture: bool,
    },
    Doc,
    /// Mine a demo cube through the CLI with debug logging
    Demo,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            fmt()?;
            clippy()?;
            test(None, false)?;
            doc()?;
        }
        Commands::Fmt => fmt()?,
        Commands::Clippy => clippy()?,
        Commands::Test { package, nocapture } => test(package.as_deref(), nocapture)?,
        Commands::Doc => doc()?,
        Commands::Demo => cargo(
            "demo",
            &["run", "-p", "veinmine-cli", "--", "--verbose", "mine", "--size", "4"],
        )?,
    }

    Ok(())
}

fn fmt() -> Result<()> {
    cargo("fmt", &["fmt", "--all", "--", "--check"])
}

fn clippy() -> Result<()> {
    cargo(
        "clippy",
        &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
    )
}

fn test(package: Option<&str>, nocapture: bool) -> Result<()> {
    let mut args = vec!["test"];
    match package {
        Some(p) => args.extend(["-p", p]),
        None => args.push("--workspace"),
    }
    if nocapture {
        args.extend(["--", "--nocapture"]);
    }
    cargo("test", &args)
}

fn doc() -> Result<()> {
    cargo("doc", &["doc", "--workspace", "--no-deps"])
}

fn cargo(label: &str, args: &[&str]) -> Result<()> {
    println!("==> cargo {}", args.join(" "));
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{label} failed ({status})");
    }
    Ok(())
}
