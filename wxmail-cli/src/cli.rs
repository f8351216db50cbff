use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use inquire::{Confirm, MultiSelect, Password, Select, Text};

use wxmail_core::{
    BatchReport, Config, Credentials, DeliveryDispatcher, DeliveryOutcome, Destination,
    DispatchSettings, ProviderId, RecipientDirectory, ReportComposer, ReportFlag, ReportOptions,
    RunRequest, TemperatureUnit, WeatherProvider, WeatherRequest,
    provider::{default_provider_from_config, file::FilePayloadProvider},
    run::run,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "wxmail", version, about = "Email and text weather reports")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "openweather" or "weatherapi".
        provider: String,
    },

    /// Print the weather report without sending it.
    Report(ReportArgs),

    /// Compose the report and deliver it.
    Send(SendArgs),

    /// Build a run from prompts.
    Interactive,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum UnitArg {
    Celsius,
    Fahrenheit,
}

impl From<UnitArg> for TemperatureUnit {
    fn from(value: UnitArg) -> Self {
        match value {
            UnitArg::Celsius => TemperatureUnit::Celsius,
            UnitArg::Fahrenheit => TemperatureUnit::Fahrenheit,
        }
    }
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Zip code to report on.
    #[arg(long)]
    zip: String,

    /// Extra sections: extra, weekly, location. Repeatable.
    #[arg(long = "option", value_name = "SECTION")]
    options: Vec<String>,

    /// Read the payload from a file instead of the configured provider.
    #[arg(long, value_name = "PATH")]
    payload_file: Option<PathBuf>,

    /// Display unit; defaults to the configured one.
    #[arg(long, value_enum)]
    unit: Option<UnitArg>,

    /// Report date (YYYY-MM-DD); defaults to today.
    #[arg(long)]
    date: Option<NaiveDate>,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    #[command(flatten)]
    report: ReportArgs,

    /// Email address to send to.
    #[arg(long, conflicts_with_all = ["sms", "recipients"])]
    email: Option<String>,

    /// Phone number to text; needs --carrier.
    #[arg(long, requires = "carrier", conflicts_with = "recipients")]
    sms: Option<String>,

    /// Carrier of the --sms number, e.g. "AT&T".
    #[arg(long)]
    carrier: Option<String>,

    /// Name to log the --sms recipient under.
    #[arg(long, default_value = "recipient")]
    name: String,

    /// Recipient file (`name,address[,carrier]` per line); defaults to the configured one.
    #[arg(long, value_name = "PATH")]
    recipients: Option<PathBuf>,

    /// Subject line for email recipients.
    #[arg(long)]
    subject: Option<String>,

    /// Two-line credentials file: account, then secret.
    #[arg(long, value_name = "PATH")]
    credentials: Option<PathBuf>,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Configure { provider } => configure(&provider),
            Command::Report(args) => {
                let config = Config::load()?;
                let text = report(&config, &args).await?;
                println!("{text}");
                Ok(())
            }
            Command::Send(args) => {
                let config = Config::load()?;
                let destination = send_destination(&config, &args)?;
                let subject = args.subject.clone().unwrap_or_else(|| config.report.subject.clone());
                let request = RunRequest {
                    zip_code: args.report.zip.clone(),
                    destination,
                    options: ReportOptions::from_names(&args.report.options),
                    subject,
                };
                deliver(&config, &args.report, args.credentials.as_deref(), &request).await
            }
            Command::Interactive => interactive().await,
        }
    }
}

fn configure(provider: &str) -> Result<()> {
    let id = ProviderId::try_from(provider)?;
    let mut config = Config::load()?;

    let api_key = Password::new(&format!("API key for {id}:"))
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;
    if api_key.trim().is_empty() {
        bail!("API key must not be empty");
    }

    config.upsert_provider_api_key(id, api_key.trim().to_string());
    if config.default_provider_id().ok() != Some(id)
        && Confirm::new(&format!("Make {id} the default provider?"))
            .with_default(true)
            .prompt()
            .context("Failed to read answer")?
    {
        config.set_default_provider(id);
    }

    config.save()?;
    println!("Saved configuration to {}", Config::config_file_path()?.display());
    Ok(())
}

fn provider(config: &Config, payload_file: Option<&Path>) -> Result<Box<dyn WeatherProvider>> {
    match payload_file {
        Some(path) => Ok(Box::new(FilePayloadProvider::new(path))),
        None => default_provider_from_config(config),
    }
}

fn composer(config: &Config, args: &ReportArgs) -> ReportComposer {
    let unit = args.unit.map(TemperatureUnit::from).unwrap_or(config.report.unit);
    match args.date {
        Some(date) => ReportComposer::new(date, unit),
        None => ReportComposer::today(unit),
    }
}

async fn report(config: &Config, args: &ReportArgs) -> Result<String> {
    let provider = provider(config, args.payload_file.as_deref())?;
    let composer = composer(config, args);
    let request = WeatherRequest {
        zip_code: args.zip.clone(),
        unit: composer.unit(),
    };

    let payload = provider.fetch_payload(&request).await?;
    let options = ReportOptions::from_names(&args.options);
    Ok(composer.report(&payload, &options)?)
}

fn send_destination(config: &Config, args: &SendArgs) -> Result<Destination> {
    if let Some(email) = &args.email {
        return Ok(Destination::Email(email.clone()));
    }
    if let Some(phone) = &args.sms {
        let carrier = args
            .carrier
            .clone()
            .ok_or_else(|| anyhow!("--sms needs --carrier"))?;
        return Ok(Destination::Sms {
            name: args.name.clone(),
            phone: phone.clone(),
            carrier,
        });
    }

    let path = args
        .recipients
        .clone()
        .or_else(|| config.report.recipients_file.clone())
        .ok_or_else(|| {
            anyhow!(
                "No destination given.\n\
                 Hint: pass --email, --sms with --carrier, or --recipients <file>."
            )
        })?;
    recipient_file_destination(config, &path)
}

fn recipient_file_destination(config: &Config, path: &Path) -> Result<Destination> {
    let load = RecipientDirectory::load_file(path, &config.gateway_directory())?;
    for err in &load.errors {
        tracing::warn!(%err, "skipping recipient");
    }
    if load.recipients.is_empty() {
        bail!("No valid recipients in {}", path.display());
    }
    Ok(Destination::Directory(load.recipients))
}

async fn deliver(
    config: &Config,
    args: &ReportArgs,
    credentials_path: Option<&Path>,
    request: &RunRequest,
) -> Result<()> {
    let credentials_path = match credentials_path {
        Some(path) => path.to_path_buf(),
        None => config.credentials_file_path()?,
    };
    let credentials = Credentials::load(&credentials_path)?;
    let sender = credentials.account().to_string();

    let provider = provider(config, args.payload_file.as_deref())?;
    let composer = composer(config, args);
    let dispatcher = DeliveryDispatcher::smtp(
        Arc::new(config.gateway_directory()),
        DispatchSettings::from_config(&config.smtp, credentials),
    );

    let result = run(request, provider.as_ref(), &composer, &dispatcher, &sender).await?;

    println!("{}", result.report);
    println!();
    print_batch(&result.batch);

    if !result.batch.is_empty() && result.batch.sent().count() == 0 {
        bail!("No messages were delivered");
    }
    Ok(())
}

fn print_batch(batch: &BatchReport) {
    for result in &batch.results {
        let address = result.address.as_deref().unwrap_or("-");
        match &result.outcome {
            DeliveryOutcome::Sent => {
                println!("  sent    {} ({}, {address})", result.recipient, result.channel);
            }
            DeliveryOutcome::Failed(failure) => {
                println!(
                    "  failed  {} ({}, {address}): {failure}",
                    result.recipient, result.channel
                );
            }
        }
    }
    println!("Delivered {} of {}", batch.sent().count(), batch.len());
}

async fn interactive() -> Result<()> {
    let config = Config::load()?;

    let zip = Text::new("Zip code:").prompt().context("Failed to read zip code")?;

    let section_names: Vec<&str> = ReportFlag::all().iter().map(|f| f.as_str()).collect();
    let sections = MultiSelect::new("Extra sections:", section_names)
        .prompt()
        .context("Failed to read sections")?;

    const EMAIL: &str = "Email";
    const TEXT: &str = "Text message";
    const FILE: &str = "Recipient file";
    let method = Select::new("Deliver by:", vec![EMAIL, TEXT, FILE])
        .prompt()
        .context("Failed to read delivery method")?;

    let destination = match method {
        EMAIL => Destination::Email(
            Text::new("Email address:")
                .prompt()
                .context("Failed to read email address")?,
        ),
        TEXT => {
            let gateways = config.gateway_directory();
            let carriers: Vec<String> = gateways.carriers().map(|c| c.to_string()).collect();
            let name = Text::new("Recipient name:")
                .with_default("recipient")
                .prompt()
                .context("Failed to read name")?;
            let phone = Text::new("Phone number:")
                .prompt()
                .context("Failed to read phone number")?;
            let carrier = Select::new("Carrier:", carriers)
                .prompt()
                .context("Failed to read carrier")?;
            Destination::Sms {
                name,
                phone,
                carrier,
            }
        }
        _ => {
            let default = config
                .report
                .recipients_file
                .as_ref()
                .map(|p| p.display().to_string());
            let mut prompt = Text::new("Recipient file:");
            if let Some(default) = default.as_deref() {
                prompt = prompt.with_default(default);
            }
            let path = prompt.prompt().context("Failed to read recipient file")?;
            recipient_file_destination(&config, Path::new(&path))?
        }
    };

    let args = ReportArgs {
        zip: zip.clone(),
        options: sections.iter().map(|s| s.to_string()).collect(),
        payload_file: None,
        unit: None,
        date: None,
    };
    let request = RunRequest {
        zip_code: zip,
        destination,
        options: ReportOptions::from_names(&sections),
        subject: config.report.subject.clone(),
    };

    if !Confirm::new("Send now?")
        .with_default(true)
        .prompt()
        .context("Failed to read answer")?
    {
        println!("Cancelled.");
        return Ok(());
    }

    deliver(&config, &args, None, &request).await
}
