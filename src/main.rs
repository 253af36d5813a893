use anyhow::{Context, Result};
use donation_intake::backend::{DonationApiClient, DonationApiConfig};
use donation_intake::config::AppConfig;
use donation_intake::controller::Stage;
use donation_intake::gallery::{GallerySource, GALLERY_UNAVAILABLE_MESSAGE};
use donation_intake::logging::init_tracing;
use donation_intake::{Backends, DonationSession, Field, FormEvent, PaymentFile};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

const HELP: &str = "\
commands:
  set <field> <value>   edit a field (donorName, donorEmail, phoneNumber, parcelName,
                        foodCount, birthdate, instagramID, transactionId, captcha)
  confirm               confirm donor details and show the payment step
  back                  return to donor details
  file <path>           attach a payment screenshot
  nofile                detach the payment screenshot
  submit                submit the donation
  wait                  wait for pending backend checks
  show                  print the form
  new                   start a new donation after completion
  gallery               list campaign photos
  help                  print this help
  quit                  exit";

enum Flow {
    Continue,
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    init_tracing(&config.logging);

    let campaign = config.campaign_config()?;
    let client = Arc::new(
        DonationApiClient::new(DonationApiConfig::from(&config.api), &campaign)
            .context("failed to build backend client")?,
    );
    info!(
        base_url = %config.api.base_url,
        campaign = %campaign.slug,
        "donation intake starting"
    );

    let mut session = DonationSession::new(
        campaign,
        Backends::shared(client.clone()),
        config.api.timeout(),
    );

    println!(
        "{} ({} per parcel)",
        session.controller().campaign().title,
        session.controller().campaign().unit_price
    );
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read input")? else {
                    break;
                };
                match handle_command(&mut session, client.as_ref(), line.trim()).await {
                    Ok(Flow::Quit) => break,
                    Ok(Flow::Continue) => {}
                    Err(err) => println!("error: {:#}", err),
                }
            }
            Some(completion) = session.next_completion(), if session.in_flight() > 0 => {
                if session.apply(completion) {
                    render(&session);
                }
            }
        }
        report_events(&mut session);
    }

    info!(session_id = %session.session_id(), "donation intake stopped");
    Ok(())
}

async fn handle_command(
    session: &mut DonationSession,
    gallery: &dyn GallerySource,
    line: &str,
) -> Result<Flow> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "" => {}
        "set" => {
            let (name, value) = rest.split_once(' ').unwrap_or((rest, ""));
            let field = Field::from_str(name)?;
            session.set_field(field, value.trim())?;
            render(session);
        }
        "confirm" => {
            if let Err(err) = session.confirm() {
                println!("cannot confirm: {}", err);
            }
            render(session);
        }
        "back" => {
            session.back()?;
            render(session);
        }
        "file" => {
            let path = Path::new(rest.trim());
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            session.select_file(PaymentFile::from_named_bytes(file_name, bytes))?;
            render(session);
        }
        "nofile" => {
            session.clear_file()?;
            render(session);
        }
        "submit" => {
            if let Err(err) = session.submit() {
                println!("cannot submit: {}", err);
            }
            render(session);
        }
        "wait" => {
            session.settle().await;
            render(session);
        }
        "show" => render(session),
        "new" => {
            session.start_over()?;
            render(session);
        }
        "gallery" => match gallery.fetch_gallery().await {
            Ok(photos) => {
                for photo in photos {
                    println!("  [{}] {} {}", photo.id, photo.src, photo.caption);
                }
            }
            Err(err) => {
                error!(error = %err, "gallery fetch failed");
                println!("{}", GALLERY_UNAVAILABLE_MESSAGE);
            }
        },
        "help" => println!("{}", HELP),
        "quit" | "exit" => return Ok(Flow::Quit),
        other => println!("unknown command '{}', try 'help'", other),
    }
    Ok(Flow::Continue)
}

fn report_events(session: &mut DonationSession) {
    for event in session.take_events() {
        if let FormEvent::Completed { idempotency_key } = event {
            let reference = idempotency_key.get(..12).unwrap_or(&idempotency_key);
            println!("Thank you! Donation recorded (reference {}).", reference);
            println!("Type 'new' to make another donation.");
        }
    }
}

fn render(session: &DonationSession) {
    let controller = session.controller();
    let draft = controller.draft();

    println!("--- {} ---", controller.stage());
    if let Some(banner) = controller.banner() {
        println!("! {}", banner);
    }

    let mut fields = vec![
        Field::DonorName,
        Field::DonorEmail,
        Field::PhoneNumber,
        Field::ParcelName,
        Field::FoodCount,
        Field::TotalAmount,
        Field::Birthdate,
        Field::InstagramId,
    ];
    if controller.stage() == Stage::Confirmed || controller.stage() == Stage::Submitting {
        fields.extend([Field::TransactionId, Field::Captcha, Field::File]);
    }

    for field in fields {
        let label = match field {
            Field::TransactionId => controller.transaction_id_label().to_string(),
            other => other.to_string(),
        };
        let value = match field {
            Field::File => controller
                .evidence()
                .map(|evidence| evidence.file.file_name.clone())
                .unwrap_or_default(),
            other => draft.value(other),
        };
        match controller.error_message(field) {
            Some(message) => println!("  {:<24} {:<30} <- {}", label, value, message),
            None => println!("  {:<24} {}", label, value),
        }
    }

    if let Some(code) = controller.captcha_code() {
        println!("  captcha code: {}", code);
    }
    if let Some(guidance) = controller.evidence().and_then(|e| e.guidance.as_deref()) {
        println!("  {}", guidance);
    }
    if controller.is_processing_image() {
        println!("  processing screenshot...");
    }
    if controller.is_submitting() {
        println!("  submitting...");
    }
}
