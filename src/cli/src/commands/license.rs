//! License authorization commands.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use crate::client::{ApiClient, LicenseStatus, LicenseUpdate};
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct GetArgs {
    /// User identifier
    user_id: String,
}

#[derive(Args)]
pub struct UpdateArgs {
    /// User identifier
    user_id: String,

    /// Whether the user holds a valid seat (true/false)
    #[arg(long)]
    valid_seat: Option<bool>,

    /// Seat tier, e.g. Premium or Standard
    #[arg(long)]
    seat_type: Option<String>,

    /// Expiration date, e.g. 2024-12-31
    #[arg(long)]
    expiration_date: Option<String>,
}

impl UpdateArgs {
    fn to_update(&self) -> LicenseUpdate {
        LicenseUpdate {
            is_valid_seat: self.valid_seat,
            seat_type: self.seat_type.clone(),
            expiration_date: self.expiration_date.clone(),
        }
    }
}

#[derive(Tabled, Serialize)]
struct StatusRow {
    #[tabled(rename = "User")]
    id: String,
    #[tabled(rename = "Valid Seat")]
    valid_seat: bool,
    #[tabled(rename = "Seat Type")]
    seat_type: String,
    #[tabled(rename = "Expires")]
    expiration_date: String,
}

impl From<&LicenseStatus> for StatusRow {
    fn from(status: &LicenseStatus) -> Self {
        Self {
            id: status.id.clone(),
            valid_seat: status.is_valid_seat,
            seat_type: status.seat_type.clone().unwrap_or_else(|| "-".to_string()),
            expiration_date: status
                .expiration_date
                .clone()
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

fn print_status(status: &LicenseStatus, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", output::render_table(&[StatusRow::from(status)]));
            Ok(())
        }
        _ => output::print_item(status, format),
    }
}

pub async fn get(args: GetArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status = client.get_authorization(&args.user_id).await?;
    print_status(&status, format)
}

pub async fn update(args: UpdateArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let update = args.to_update();
    if update.is_empty() {
        anyhow::bail!("nothing to update: pass --valid-seat, --seat-type or --expiration-date");
    }

    let status = client.update_authorization(&args.user_id, &update).await?;
    if matches!(format, OutputFormat::Table) {
        output::print_success(&format!("Updated authorization for {}", status.id));
    }
    print_status(&status, format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_args_map_to_partial_update() {
        let args = UpdateArgs {
            user_id: "1".into(),
            valid_seat: Some(false),
            seat_type: None,
            expiration_date: Some("2025-01-01".into()),
        };
        let update = args.to_update();

        assert_eq!(update.is_valid_seat, Some(false));
        assert_eq!(update.seat_type, None);
        assert!(!update.is_empty());
    }

    #[test]
    fn test_row_renders_missing_fields_as_dash() {
        let row = StatusRow::from(&LicenseStatus {
            id: "ghost".into(),
            is_valid_seat: false,
            seat_type: None,
            expiration_date: None,
        });
        assert_eq!(row.seat_type, "-");
        assert_eq!(row.expiration_date, "-");
    }

    #[tokio::test]
    async fn test_empty_update_is_refused_before_any_request() {
        let client = ApiClient::new("http://127.0.0.1:9").unwrap();
        let args = UpdateArgs {
            user_id: "1".into(),
            valid_seat: None,
            seat_type: None,
            expiration_date: None,
        };

        let err = update(args, &client, OutputFormat::Json).await.unwrap_err();
        assert!(err.to_string().contains("nothing to update"));
    }
}
