use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Call tools and manage a running tool gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:3030", env = "GATEWAY_URL")]
    url: String,

    /// Admin API key for `status` and `reload`.
    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION", env = "GATEWAY_ADMIN_KEY")]
    admin_key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway liveness
    Health,
    /// Invoke a tool, e.g. `call crm.lookup_customer --body '{"query":"a@b.c"}'`
    Call {
        tool: String,
        #[arg(short, long, default_value = "{}")]
        body: String,
        /// Idempotency key (required for write tools)
        #[arg(short, long)]
        key: Option<String>,
        #[arg(short, long)]
        tenant: Option<String>,
        /// Caller bearer token
        #[arg(long, env = "GATEWAY_TOKEN")]
        token: Option<String>,
    },
    /// Show snapshot, tools and store backends
    Status,
    /// Reload the manifest and tenant documents
    Reload,
    /// Inspect one tenant's settings and live limiter/breaker state
    Tenant { id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut admin_headers = HeaderMap::new();
    admin_headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.admin_key))?,
    );

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{base}/health")).send().await?;
            print_response(res).await?;
        }
        Commands::Call {
            tool,
            body,
            key,
            tenant,
            token,
        } => {
            let body: Value = serde_json::from_str(&body)?;
            let mut req = client
                .post(format!("{base}/tools/{}", tool.replace('.', "/")))
                .json(&body);
            if let Some(key) = key {
                req = req.header("idempotency-key", key);
            }
            if let Some(tenant) = tenant {
                req = req.header("x-tenant-id", tenant);
            }
            if let Some(token) = token {
                req = req.bearer_auth(token);
            }
            print_response(req.send().await?).await?;
        }
        Commands::Status => {
            let res = client
                .get(format!("{base}/admin/status"))
                .headers(admin_headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Reload => {
            let res = client
                .post(format!("{base}/admin/reload"))
                .headers(admin_headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Tenant { id } => {
            let res = client
                .get(format!("{base}/admin/tenants/{id}"))
                .headers(admin_headers)
                .send()
                .await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    let rendered = match serde_json::from_str::<Value>(&text) {
        Ok(json) => serde_json::to_string_pretty(&json)?,
        Err(_) => text,
    };
    if status.is_success() {
        println!("{rendered}");
    } else {
        eprintln!("Error: gateway returned status {status}");
        eprintln!("{rendered}");
    }
    Ok(())
}
