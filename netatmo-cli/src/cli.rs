use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use inquire::{Confirm, Password, Text};

use netatmo_core::{
    Config, MainModule, MeasureRequest, Measurements, NetatmoClient, Scale, Scope, StationData,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "netatmo", version, about = "Netatmo weather station CLI")]
pub struct Cli {
    /// Refresh token to authenticate with; overrides the config file.
    #[arg(long, env = "NETATMO_REFRESH_TOKEN", global = true, hide_env_values = true)]
    pub refresh_token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure app credentials interactively.
    Configure,

    /// Obtain tokens from an authorization code or a username/password.
    Login {
        /// Authorization code returned to the redirect URI.
        #[arg(long, requires = "redirect_uri", conflicts_with = "username")]
        code: Option<String>,

        /// Redirect URI the code was issued for.
        #[arg(long)]
        redirect_uri: Option<String>,

        /// Account e-mail for the password grant; the password is prompted.
        #[arg(long)]
        username: Option<String>,

        /// Requested scopes, e.g. "read_station".
        #[arg(long, default_value = "read_station", value_delimiter = ',')]
        scope: Vec<String>,
    },

    /// List stations and their modules.
    Stations {
        /// Include favorite stations.
        #[arg(long)]
        favorites: bool,
    },

    /// Show historical measurements of a module.
    Measure {
        /// Module id (a station id measures the station itself).
        #[arg(long)]
        module: String,

        /// Station the module belongs to; looked up when absent.
        #[arg(long)]
        device: Option<String>,

        /// One of max, 30min, 1hour, 3hours, 1day, 1week, 1month.
        #[arg(long, default_value = "30min")]
        scale: String,

        /// Start date, RFC 3339 or YYYY-MM-DD.
        #[arg(long)]
        begin: Option<String>,

        /// End date, RFC 3339 or YYYY-MM-DD.
        #[arg(long)]
        end: Option<String>,

        #[arg(long, default_value_t = 1024)]
        limit: u32,

        /// Print rows in the order the server sent them instead of by time.
        #[arg(long)]
        raw_order: bool,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let mut config = Config::load()?;

        match self.command {
            Command::Configure => configure(&mut config),
            Command::Login {
                code,
                redirect_uri,
                username,
                scope,
            } => {
                let scopes = scope
                    .iter()
                    .map(|s| Scope::try_from(s.as_str()))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                let client = NetatmoClient::new(config.credentials()?, config.client_config())?;

                let credentials = match (code, redirect_uri, username) {
                    (Some(code), Some(redirect_uri), _) => {
                        client
                            .tokens()
                            .exchange_authorization_code(&code, &redirect_uri, &scopes)
                            .await?
                    }
                    (None, _, Some(username)) => {
                        let password = Password::new("Password:")
                            .without_confirmation()
                            .prompt()?;
                        client
                            .tokens()
                            .authenticate_with_password(&username, &password, &scopes)
                            .await?
                    }
                    _ => return Err(anyhow!("Pass either --code and --redirect-uri, or --username.")),
                };

                println!("Refresh token: {}", credentials.refresh_token());
                println!("Access token expires at {}", credentials.expires_at());

                if Confirm::new("Save the refresh token to the config file?")
                    .with_default(true)
                    .prompt()?
                {
                    config.refresh_token = Some(credentials.refresh_token().to_string());
                    config.save()?;
                }
                Ok(())
            }
            Command::Stations { favorites } => {
                let client = authenticated_client(&config, self.refresh_token)?;
                let data = client.get_station_data(favorites).await?;
                print_stations(&data);
                Ok(())
            }
            Command::Measure {
                module,
                device,
                scale,
                begin,
                end,
                limit,
                raw_order,
            } => {
                let scale = Scale::try_from(scale.as_str())?;
                let begin = begin.as_deref().map(parse_when).transpose()?;
                let end = end.as_deref().map(parse_when).transpose()?;

                let client = authenticated_client(&config, self.refresh_token)?;
                let data = client.get_station_data(false).await?;

                let station = find_station(&data, &module, device.or(config.default_device))?;
                let capabilities = station
                    .capabilities_of(&module)
                    .cloned()
                    .ok_or_else(|| anyhow!("Module {module} not found on station {}", station.id))?;

                let request = MeasureRequest::new(&station.id, &module, capabilities)
                    .with_scale(scale)
                    .with_range(begin, end)
                    .with_limit(limit);

                let mut measurements = client.get_measure(&request).await?;
                if !raw_order {
                    sort_by_time(&mut measurements);
                }
                print_measurements(&measurements);
                Ok(())
            }
        }
    }
}

fn configure(config: &mut Config) -> anyhow::Result<()> {
    let client_id = Text::new("Client id:")
        .with_initial_value(config.client_id.as_deref().unwrap_or_default())
        .prompt()?;
    let client_secret = Password::new("Client secret:")
        .without_confirmation()
        .prompt()?;
    config.set_credentials(client_id, client_secret);

    let refresh_token = Text::new("Refresh token (optional):").prompt()?;
    if !refresh_token.trim().is_empty() {
        config.refresh_token = Some(refresh_token.trim().to_string());
    }

    let device = Text::new("Default station id (optional):")
        .with_initial_value(config.default_device.as_deref().unwrap_or_default())
        .prompt()?;
    config.default_device = Some(device.trim().to_string()).filter(|d| !d.is_empty());

    config.save()?;
    println!("Saved configuration to {}", Config::config_file_path()?.display());
    Ok(())
}

fn authenticated_client(
    config: &Config,
    refresh_token: Option<String>,
) -> anyhow::Result<NetatmoClient> {
    let refresh_token = refresh_token
        .or_else(|| config.refresh_token.clone())
        .ok_or_else(|| {
            anyhow!(
                "No refresh token available.\n\
                 Hint: run `netatmo login` or pass --refresh-token."
            )
        })?;

    let client = NetatmoClient::new(config.credentials()?, config.client_config())?;
    client.tokens().seed_refresh_token(refresh_token);
    Ok(client)
}

fn find_station<'a>(
    data: &'a StationData,
    module: &str,
    device: Option<String>,
) -> anyhow::Result<&'a MainModule> {
    match device {
        Some(id) => data
            .devices
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| anyhow!("Station {id} not found")),
        None => data
            .station_of(module)
            .ok_or_else(|| anyhow!("No station has a module {module}")),
    }
}

/// Accept RFC 3339 timestamps or bare dates (midnight UTC).
fn parse_when(value: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{value}', expected RFC 3339 or YYYY-MM-DD"))?;
    Ok(date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc())
}

fn join_caps(caps: &netatmo_core::CapabilitySet) -> String {
    caps.iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_stations(data: &StationData) {
    if data.devices.is_empty() {
        println!("No stations.");
        return;
    }

    for station in &data.devices {
        println!(
            "{} {} [{}]{}",
            station.id,
            station.station_name.as_deref().unwrap_or("(unnamed)"),
            join_caps(&station.capabilities),
            if station.reachable { "" } else { " unreachable" },
        );
        if let Some(city) = &station.place.city {
            println!("  location: {city}");
        }
        for module in &station.modules {
            println!(
                "  {} {} {} [{}]{}",
                module.id,
                module.kind,
                module.name.as_deref().unwrap_or("(unnamed)"),
                join_caps(&module.capabilities),
                module
                    .battery_percent
                    .map(|b| format!(" battery {b}%"))
                    .unwrap_or_default(),
            );
        }
    }
}

/// Numeric timestamps first, ascending; anything else keeps its place after them.
fn sort_by_time(measurements: &mut Measurements) {
    measurements.sort_by_cached_key(|ts, _| ts.parse::<i64>().map_or((1, 0), |t| (0, t)));
}

fn print_measurements(measurements: &Measurements) {
    if measurements.is_empty() {
        println!("No measurements.");
        return;
    }

    for (ts, measurement) in measurements {
        let when = ts
            .parse::<i64>()
            .ok()
            .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| ts.clone());

        let values = measurement
            .iter()
            .map(|(t, v)| match v {
                Some(v) => format!("{t}={v}"),
                None => format!("{t}=-"),
            })
            .collect::<Vec<_>>()
            .join(" ");
        println!("{when} {values}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn login_code_requires_redirect_uri() {
        let err = Cli::try_parse_from(["netatmo", "login", "--code", "abc"]).unwrap_err();
        assert!(err.to_string().contains("redirect-uri"));
    }

    #[test]
    fn measure_defaults() {
        let cli =
            Cli::try_parse_from(["netatmo", "measure", "--module", "02:00:00:00:00:01"]).unwrap();
        match cli.command {
            Command::Measure {
                module,
                scale,
                limit,
                raw_order,
                ..
            } => {
                assert_eq!(module, "02:00:00:00:00:01");
                assert_eq!(scale, "30min");
                assert_eq!(limit, 1024);
                assert!(!raw_order);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn measure_takes_module_flag_and_raw_order() {
        assert!(Cli::try_parse_from(["netatmo", "measure", "02:00:00:00:00:01"]).is_err());

        let cli = Cli::try_parse_from([
            "netatmo",
            "measure",
            "--module",
            "02:00:00:00:00:01",
            "--raw-order",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Measure { raw_order: true, .. }));
    }

    #[test]
    fn rows_sort_by_numeric_timestamp() {
        let mut m = Measurements::new();
        for ts in ["5600", "900", "x", "10000"] {
            m.insert(ts.to_string(), Default::default());
        }

        sort_by_time(&mut m);
        assert_eq!(m.keys().collect::<Vec<_>>(), vec!["900", "5600", "10000", "x"]);
    }

    #[test]
    fn parse_when_accepts_dates_and_timestamps() {
        assert_eq!(parse_when("2024-03-01").unwrap().timestamp(), 1709251200);
        assert_eq!(
            parse_when("2024-03-01T01:00:00+01:00").unwrap().timestamp(),
            1709251200
        );
        assert!(parse_when("yesterday").is_err());
    }
}
