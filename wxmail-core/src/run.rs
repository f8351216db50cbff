//! One end-to-end run: fetch, compose, deliver.

use crate::dispatch::{ComposedReport, DeliveryDispatcher};
use crate::error::RunError;
use crate::model::{BatchReport, Destination, Recipient, RunRequest, RunResult, WeatherRequest};
use crate::provider::WeatherProvider;
use crate::report::ReportComposer;
use crate::transport::TransportFactory;

pub async fn run<F: TransportFactory>(
    request: &RunRequest,
    provider: &dyn WeatherProvider,
    composer: &ReportComposer,
    dispatcher: &DeliveryDispatcher<F>,
    sender: &str,
) -> Result<RunResult, RunError> {
    let weather = WeatherRequest {
        zip_code: request.zip_code.clone(),
        unit: composer.unit(),
    };
    tracing::info!(zip = %weather.zip_code, provider = provider.name(), "fetching weather");
    let payload = provider.fetch_payload(&weather).await?;
    let body = composer.report(&payload, &request.options)?;

    let report = ComposedReport {
        subject: request.subject.clone(),
        body,
    };

    let batch = match &request.destination {
        Destination::Email(address) => {
            let recipient = Recipient::email(address.clone(), address.clone());
            let result = dispatcher
                .dispatch_email(sender, &recipient, &report.subject, &report.body)
                .await?;
            BatchReport {
                results: vec![result],
            }
        }
        Destination::Sms {
            name,
            phone,
            carrier,
        } => {
            let recipient = Recipient::sms(name.clone(), phone.clone(), carrier);
            dispatcher
                .dispatch_to_all(sender, [&recipient], &report)
                .await?
        }
        Destination::Directory(recipients) => {
            dispatcher
                .dispatch_to_all(sender, recipients.values(), &report)
                .await?
        }
    };

    Ok(RunResult {
        report: report.body,
        batch,
    })
}
