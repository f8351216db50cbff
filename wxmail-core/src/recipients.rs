//! Recipient file loading.
//!
//! One record per line: `name,address[,carrier]`. A carrier makes the record an
//! SMS recipient; otherwise the address is an email address. Lines starting with
//! `%` or `#` are comments.
//!
//! Names are unique and the last record for a name wins. That holds for an invalid
//! record too: it is reported and replaces the earlier record with no recipient.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

use crate::error::{ValidationError, ValidationReason};
use crate::gateway::{Carrier, GatewayDirectory};
use crate::model::{Channel, Recipient};

const COMMENT_MARKERS: &[char] = &['%', '#'];
const PHONE_SEPARATORS: &[char] = &['-', '(', ')', '.', ' '];

/// Outcome of loading a recipient source: the valid records plus every rejected one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientLoad {
    pub recipients: BTreeMap<String, Recipient>,
    pub errors: Vec<ValidationError>,
}

pub struct RecipientDirectory;

impl RecipientDirectory {
    pub fn load(source: &str, gateways: &GatewayDirectory) -> RecipientLoad {
        let mut load = RecipientLoad::default();

        for (index, line) in source.lines().enumerate() {
            let line_no = index + 1;
            if line.trim().is_empty() || line.starts_with(COMMENT_MARKERS) {
                continue;
            }

            let parsed = parse_record(line).and_then(|r| Self::validate(r, gateways));
            match parsed {
                Ok(recipient) => {
                    if load.recipients.contains_key(&recipient.name) {
                        tracing::debug!(
                            name = %recipient.name,
                            line = line_no,
                            "duplicate recipient, last one wins"
                        );
                    }
                    load.recipients.insert(recipient.name.clone(), recipient);
                }
                Err(mut err) => {
                    err.line = Some(line_no);
                    tracing::warn!(%err, "skipping recipient record");
                    if load.recipients.remove(&err.name).is_some() {
                        tracing::warn!(
                            name = %err.name,
                            line = line_no,
                            "invalid duplicate drops the earlier record"
                        );
                    }
                    load.errors.push(err);
                }
            }
        }

        load
    }

    pub fn load_file(path: &Path, gateways: &GatewayDirectory) -> Result<RecipientLoad> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read recipient file: {}", path.display()))?;
        Ok(Self::load(&contents, gateways))
    }

    /// Normalizes and checks a single recipient.
    pub fn validate(
        recipient: Recipient,
        gateways: &GatewayDirectory,
    ) -> Result<Recipient, ValidationError> {
        let name = recipient.name.trim().to_string();
        let invalid = |reason| ValidationError {
            line: None,
            name: name.clone(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid(ValidationReason::EmptyName));
        }

        match recipient.channel {
            Channel::Sms => {
                let phone = normalize_phone(&recipient.address).ok_or_else(|| {
                    invalid(ValidationReason::InvalidPhone(recipient.address.clone()))
                })?;
                let carrier = recipient
                    .carrier
                    .as_ref()
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| invalid(ValidationReason::MissingCarrier))?;
                if !gateways.contains(carrier) {
                    return Err(invalid(ValidationReason::UnknownCarrier(carrier.to_string())));
                }
                Ok(Recipient {
                    name,
                    channel: Channel::Sms,
                    address: phone,
                    carrier: Some(carrier.clone()),
                })
            }
            Channel::Email => {
                let address = recipient.address.trim();
                if !is_email_address(address) {
                    return Err(invalid(ValidationReason::InvalidEmail(address.to_string())));
                }
                Ok(Recipient {
                    name,
                    channel: Channel::Email,
                    address: address.to_string(),
                    carrier: None,
                })
            }
        }
    }
}

fn parse_record(line: &str) -> Result<Recipient, ValidationError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let name = fields.first().copied().unwrap_or_default();

    match fields.as_slice() {
        [name, address] | [name, address, ""] => Ok(Recipient::email(*name, *address)),
        [name, address, carrier] => Ok(Recipient {
            name: name.to_string(),
            channel: Channel::Sms,
            address: address.to_string(),
            carrier: Some(Carrier::new(carrier)),
        }),
        _ => Err(ValidationError {
            line: None,
            name: name.to_string(),
            reason: ValidationReason::FieldCount(fields.len()),
        }),
    }
}

/// Strips common separators; `None` unless only digits remain.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.trim().chars().filter(|c| !PHONE_SEPARATORS.contains(c)).collect();
    (!digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())).then_some(digits)
}

pub fn is_email_address(address: &str) -> bool {
    match address.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !address.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn gateways() -> GatewayDirectory {
        GatewayDirectory::default()
    }

    #[test]
    fn one_unknown_carrier_among_three_records() {
        let source = "Alice, 5551234567, AT&T\nBob,5559876543,ACME\nCarol , carol@example.com\n";
        let load = RecipientDirectory::load(source, &gateways());

        assert_eq!(load.recipients.len(), 2);
        assert!(load.recipients.contains_key("Alice"));
        assert!(load.recipients.contains_key("Carol"));

        assert_eq!(load.errors.len(), 1);
        let err = &load.errors[0];
        assert_eq!(err.line, Some(2));
        assert_eq!(err.name, "Bob");
        assert_eq!(err.reason, ValidationReason::UnknownCarrier("ACME".into()));
    }

    #[test]
    fn fields_are_trimmed_and_channel_is_inferred() {
        let source = "  Alice ,  (555) 123-4567 ,  verizon \nCarol,carol@example.com\n";
        let load = RecipientDirectory::load(source, &gateways());

        let alice = &load.recipients["Alice"];
        assert_eq!(alice.channel, Channel::Sms);
        assert_eq!(alice.address, "5551234567");
        assert_eq!(alice.carrier, Some(Carrier::new("VERIZON")));

        let carol = &load.recipients["Carol"];
        assert_eq!(carol.channel, Channel::Email);
        assert_eq!(carol.carrier, None);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let source = "% name,number,carrier\n\n# another comment\nAlice,5551234567,TMOBILE\n";
        let load = RecipientDirectory::load(source, &gateways());
        assert_eq!(load.recipients.len(), 1);
        assert!(load.errors.is_empty());
    }

    #[test]
    fn duplicate_names_keep_the_last_record() {
        let source = "Alice,5551234567,TMOBILE\nAlice,alice@example.com\n";
        let load = RecipientDirectory::load(source, &gateways());
        assert_eq!(load.recipients.len(), 1);
        assert_eq!(load.recipients["Alice"].channel, Channel::Email);
    }

    #[test]
    fn invalid_duplicate_replaces_the_earlier_record() {
        let source = "Alice,5551234567,TMOBILE
Bob,bob@example.com
Alice,555-CALL-NOW,AT&T
";
        let load = RecipientDirectory::load(source, &gateways());

        assert!(!load.recipients.contains_key("Alice"));
        assert!(load.recipients.contains_key("Bob"));
        assert_eq!(load.errors.len(), 1);
        assert_eq!(load.errors[0].name, "Alice");
        assert_eq!(load.errors[0].line, Some(3));
    }

    #[test]
    fn valid_record_after_an_invalid_one_is_kept() {
        let source = "Alice,not-an-email
Alice,alice@example.com
";
        let load = RecipientDirectory::load(source, &gateways());

        assert_eq!(load.recipients["Alice"].address, "alice@example.com");
        assert_eq!(load.errors.len(), 1);
    }

    #[test]
    fn malformed_records_are_reported_not_fatal() {
        let source = "JustAName\n\
                      Dan,555-CALL-NOW,AT&T\n\
                      Eve,not-an-email\n\
                      Frank,1,2,3\n\
                      Gina,5551112222,CRICKET\n";
        let load = RecipientDirectory::load(source, &gateways());

        assert_eq!(load.recipients.len(), 1);
        let reasons: Vec<_> = load.errors.iter().map(|e| e.reason.clone()).collect();
        assert_eq!(
            reasons,
            vec![
                ValidationReason::FieldCount(1),
                ValidationReason::InvalidPhone("555-CALL-NOW".into()),
                ValidationReason::InvalidEmail("not-an-email".into()),
                ValidationReason::FieldCount(4),
            ]
        );
    }

    #[test]
    fn validate_rejects_sms_without_carrier() {
        let recipient = Recipient {
            name: "Alice".into(),
            channel: Channel::Sms,
            address: "5551234567".into(),
            carrier: None,
        };
        let err = RecipientDirectory::validate(recipient, &gateways()).unwrap_err();
        assert_eq!(err.reason, ValidationReason::MissingCarrier);
    }

    #[test]
    fn load_file_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "Alice,5551234567,AT&T").expect("write");
        writeln!(file, "Bob,bob@example.com").expect("write");

        let load = RecipientDirectory::load_file(file.path(), &gateways()).expect("load");
        assert_eq!(load.recipients.len(), 2);
    }

    #[test]
    fn load_file_errors_when_missing() {
        let err =
            RecipientDirectory::load_file(Path::new("/nonexistent/recipients.txt"), &gateways())
                .unwrap_err();
        assert!(err.to_string().contains("Failed to read recipient file"));
    }

    #[test]
    fn email_address_shape() {
        assert!(is_email_address("a@b.com"));
        assert!(!is_email_address("@b.com"));
        assert!(!is_email_address("a@"));
        assert!(!is_email_address("a@b@c"));
        assert!(!is_email_address("a b@c.com"));
    }
}
