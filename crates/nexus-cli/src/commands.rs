//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nexus_core::{
    extract_bearer, MemoryDirectory, Principal, PrincipalDirectory, PrincipalId, SystemClock,
    TokenService,
};
use nexus_mobile::lockout::describe_duration;
use nexus_mobile::{
    Capabilities, CredentialStatus, CredentialStore, FileCredentialStore, LockoutPolicy,
    LoginFlow, LoginRequest, NoSecondFactor, PinAuthenticator, ResponseCookies, SecondFactor,
    TotpProvider,
};
use serde_json::json;
use tracing::{info, warn};

use crate::config::NexusConfig;

/// Nexus authentication administration
#[derive(Parser, Debug)]
#[command(name = "nexus-auth")]
#[command(about = "Manage Nexus mobile PIN credentials and API bearer tokens")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to config.json in the data directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for the credential store and directory files
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print a random PIN
    GeneratePin {
        /// PIN length (defaults to the configured length)
        #[arg(long)]
        length: Option<usize>,
    },

    /// Create or replace a mobile credential
    Provision {
        /// Principal id or username
        #[arg(long)]
        user: String,

        /// PIN to set; a random one is generated when omitted
        #[arg(long)]
        pin: Option<String>,

        /// Do not grant time tracking
        #[arg(long)]
        no_time_tracking: bool,

        /// Do not grant expenses
        #[arg(long)]
        no_expenses: bool,
    },

    /// Re-activate a mobile credential
    Enable {
        #[arg(long)]
        user: String,
    },

    /// Deactivate a mobile credential
    Disable {
        #[arg(long)]
        user: String,
    },

    /// Clear failed attempts and any lock
    Unlock {
        #[arg(long)]
        user: String,
    },

    /// Change the features a credential can use
    Capabilities {
        #[arg(long)]
        user: String,

        #[arg(long, action = clap::ArgAction::Set)]
        time_tracking: bool,

        #[arg(long, action = clap::ArgAction::Set)]
        expenses: bool,
    },

    /// Show one credential, or all of them
    Status {
        #[arg(long)]
        user: Option<String>,
    },

    /// Issue an API bearer token
    IssueToken {
        #[arg(long)]
        user: String,

        /// Lifetime in seconds (defaults to the configured TTL)
        #[arg(long)]
        ttl: Option<i64>,
    },

    /// Verify an API bearer token
    VerifyToken {
        /// Token, or a full `Bearer ...` header value
        token: String,
    },

    /// Run the mobile login flow against the local store
    Login {
        #[arg(long)]
        username: String,

        #[arg(long)]
        pin: String,

        /// Authenticator code, when a second factor is enrolled
        #[arg(long)]
        totp: Option<String>,
    },
}

/// Services wired from configuration
struct Services {
    config: NexusConfig,
    directory: Arc<MemoryDirectory>,
    store: Arc<FileCredentialStore>,
    data_dir: PathBuf,
}

impl Services {
    fn open(cli: &Cli) -> Result<Self> {
        let data_dir = cli
            .data_dir
            .clone()
            .unwrap_or_else(NexusConfig::default_data_dir);
        let config = NexusConfig::resolve(cli.config.as_deref(), &data_dir)
            .context("Failed to load configuration")?;

        let directory_path = config.directory_path(&data_dir);
        let directory = if directory_path.exists() {
            MemoryDirectory::load(&directory_path).with_context(|| {
                format!("Failed to load directory {}", directory_path.display())
            })?
        } else {
            warn!(path = %directory_path.display(), "principal directory not found");
            MemoryDirectory::new()
        };

        let store = FileCredentialStore::open(config.credential_store_path(&data_dir))
            .context("Failed to open credential store")?;

        Ok(Self {
            config,
            directory: Arc::new(directory),
            store: Arc::new(store),
            data_dir,
        })
    }

    /// The configured second factor
    ///
    /// A configured secrets file that is missing is an error: falling back
    /// to no second factor would let enrolled users in on their PIN alone.
    fn second_factor(&self) -> Result<Arc<dyn SecondFactor>> {
        let Some(path) = &self.config.totp_secrets_path else {
            return Ok(Arc::new(NoSecondFactor));
        };
        if !path.exists() {
            bail!("TOTP secrets file {} not found", path.display());
        }

        let provider = TotpProvider::load(path, Arc::new(SystemClock))
            .with_context(|| format!("Failed to load TOTP secrets {}", path.display()))?
            .with_lockout(self.config.mobile.lockout.clone())
            .with_attempts_file(self.config.totp_attempts_path(&self.data_dir));
        Ok(Arc::new(provider))
    }

    fn authenticator(&self) -> Result<PinAuthenticator> {
        let authenticator = PinAuthenticator::new(
            self.store.clone(),
            self.second_factor()?,
            Arc::new(SystemClock),
            self.config.mobile.clone(),
        )?;
        Ok(authenticator)
    }

    fn token_service(&self) -> Result<TokenService> {
        let service = TokenService::new(
            self.config.token.clone(),
            self.directory.clone(),
            Arc::new(SystemClock),
        )
        .context("Token commands need a signing secret (set NEXUS_JWT_SECRET)")?;
        Ok(service)
    }

    fn resolve(&self, user: &str) -> Result<PrincipalId> {
        resolve_principal(self.directory.as_ref(), user)
    }
}

/// Accept a numeric principal id or a username known to the directory
pub fn resolve_principal(directory: &dyn PrincipalDirectory, user: &str) -> Result<PrincipalId> {
    let user = user.trim();
    if !user.is_empty() && user.bytes().all(|b| b.is_ascii_digit()) {
        return user
            .parse::<PrincipalId>()
            .with_context(|| format!("Invalid principal id {user:?}"));
    }
    match directory.by_username(user) {
        Some(principal) => Ok(principal.id),
        None => bail!("Unknown user {user:?}"),
    }
}

/// Display claims carried in issued tokens
pub fn display_claims(principal: Option<&Principal>) -> serde_json::Value {
    match principal {
        Some(p) => json!({
            "username": p.username,
            "display_name": p.display_name,
            "roles": p.roles,
        }),
        None => serde_json::Value::Null,
    }
}

/// Human-readable credential summary for `status`
pub fn format_status(status: &CredentialStatus, policy: &LockoutPolicy) -> String {
    let lock = match (status.lock_remaining_secs, status.locked_until) {
        (Some(secs), _) => format!("yes ({})", describe_duration(secs)),
        (None, Some(_)) => "no (lock expired)".to_string(),
        (None, None) => format!("no ({})", policy.describe_lockout(status.failed_attempts)),
    };
    let last_login = status
        .last_login_at
        .and_then(format_time)
        .unwrap_or_else(|| "never".to_string());

    [
        format!("Principal {}", status.principal_id),
        format!("  Active: {}", status.is_active),
        format!("  Time tracking: {}", status.capabilities.time_tracking),
        format!("  Expenses: {}", status.capabilities.expenses),
        format!("  Failed attempts: {}", status.failed_attempts),
        format!("  Locked: {lock}"),
        format!("  Last login: {last_login}"),
    ]
    .join("\n")
}

fn format_time(ts: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

/// Run the CLI
pub async fn run(cli: Cli) -> Result<()> {
    let ctx = Services::open(&cli)?;
    info!(data_dir = %ctx.data_dir.display(), "nexus-auth starting");

    match cli.command {
        Commands::GeneratePin { length } => {
            let length = length.unwrap_or(ctx.config.mobile.pin_length);
            if !(nexus_mobile::MIN_PIN_LENGTH..=nexus_mobile::MAX_PIN_LENGTH).contains(&length) {
                bail!(
                    "PIN length must be {}-{}",
                    nexus_mobile::MIN_PIN_LENGTH,
                    nexus_mobile::MAX_PIN_LENGTH
                );
            }
            println!("{}", nexus_mobile::generate_pin(length).as_str());
        }

        Commands::Provision {
            user,
            pin,
            no_time_tracking,
            no_expenses,
        } => {
            let principal_id = ctx.resolve(&user)?;
            let auth = ctx.authenticator()?;
            let capabilities = Capabilities {
                time_tracking: !no_time_tracking,
                expenses: !no_expenses,
            };

            match pin {
                Some(pin) => {
                    auth.create_credential(principal_id, &pin, capabilities)?;
                    println!("Credential set for principal {principal_id}");
                }
                None => {
                    let pin = auth.generate_pin();
                    auth.create_credential(principal_id, &pin, capabilities)?;
                    println!("Credential set for principal {principal_id}");
                    println!("PIN: {}", pin.as_str());
                    println!("Hand this PIN to the user now; it cannot be shown again.");
                }
            }
        }

        Commands::Enable { user } => {
            let principal_id = ctx.resolve(&user)?;
            ctx.authenticator()?.set_active(principal_id, true)?;
            println!("Credential for principal {principal_id} enabled");
        }

        Commands::Disable { user } => {
            let principal_id = ctx.resolve(&user)?;
            ctx.authenticator()?.set_active(principal_id, false)?;
            println!("Credential for principal {principal_id} disabled");
        }

        Commands::Unlock { user } => {
            let principal_id = ctx.resolve(&user)?;
            ctx.authenticator()?.unlock(principal_id)?;
            println!("Credential for principal {principal_id} unlocked");
        }

        Commands::Capabilities {
            user,
            time_tracking,
            expenses,
        } => {
            let principal_id = ctx.resolve(&user)?;
            ctx.authenticator()?.set_capabilities(
                principal_id,
                Capabilities {
                    time_tracking,
                    expenses,
                },
            )?;
            println!("Capabilities updated for principal {principal_id}");
        }

        Commands::Status { user } => {
            let auth = ctx.authenticator()?;
            let policy = &ctx.config.mobile.lockout;
            match user {
                Some(user) => {
                    let status = auth.credential_status(ctx.resolve(&user)?)?;
                    println!("{}", format_status(&status, policy));
                }
                None => {
                    let all = ctx.store.list()?;
                    if all.is_empty() {
                        println!("No mobile credentials");
                    }
                    for credential in all {
                        let status = auth.credential_status(credential.principal_id)?;
                        println!("{}", format_status(&status, policy));
                    }
                }
            }
        }

        Commands::IssueToken { user, ttl } => {
            let principal_id = ctx.resolve(&user)?;
            let service = ctx.token_service()?;
            let principal = ctx.directory.by_id(principal_id);
            let claims = display_claims(principal.as_ref());

            let issued = match ttl {
                Some(ttl) => service.issue(principal_id, claims, ttl)?,
                None => service.issue_default(principal_id, claims)?,
            };
            println!("{}", issued.token);
            if let Some(expires) = format_time(issued.expires_at) {
                eprintln!("Expires: {expires}");
            }
        }

        Commands::VerifyToken { token } => {
            let service = ctx.token_service()?;
            let token = extract_bearer(&token).unwrap_or(token.trim());
            match service.verify(token) {
                Ok(verified) => {
                    println!(
                        "Valid token for {} ({})",
                        verified.principal.username, verified.principal.id
                    );
                    if let Some(expires) = verified.claims.exp.and_then(format_time) {
                        println!("  Expires: {expires}");
                    }
                }
                Err(e) => {
                    warn!(kind = e.kind(), "token rejected");
                    bail!("{} ({})", e.public_message(), e.kind());
                }
            }
        }

        Commands::Login {
            username,
            pin,
            totp,
        } => {
            let auth = Arc::new(ctx.authenticator()?);
            let flow = LoginFlow::new(ctx.directory.clone(), auth);

            // The CLI is its own form, so the token always matches
            let csrf = "nexus-auth-cli";
            let mut request = LoginRequest::new(username, pin, csrf);
            if let Some(code) = totp {
                request = request.with_totp(code);
            }

            let mut cookies = ResponseCookies::new();
            match flow.login(&request, csrf, &mut cookies).await {
                Ok(success) => {
                    println!("Logged in as {}", success.principal.username);
                    println!(
                        "  Session expires: {}",
                        format_time(success.session.expires_at).unwrap_or_default()
                    );
                    println!("  Redirect: {}", success.redirect_to);
                }
                Err(failure) => {
                    bail!("Login failed: {} [{:?}]", failure.message, failure.kind);
                }
            }
        }
    }

    Ok(())
}
