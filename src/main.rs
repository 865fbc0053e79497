use anyhow::{Context, Result, anyhow};
use clap::Parser;
use ebay_connect::{Call, Connection, ConnectionConfig, Credentials, XmlHooks};
use std::path::PathBuf;
use std::sync::Arc;

/// ebay-connect - call the eBay APIs from the command line
///
/// Application keys are read from EBAY_CLIENT_ID and EBAY_CLIENT_SECRET unless
/// given as options. An application token is fetched before the first call.
///
/// Examples:
///   ebay-connect --domain api.ebay.com --uri /ws/api.dll call GetItem --data '{"ItemID": "110"}'
///   ebay-connect token
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON connection config file
    #[arg(long, short = 'c', env = "EBAY_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// API domain (overrides the config file)
    #[arg(long, value_name = "DOMAIN", global = true)]
    domain: Option<String>,

    /// API path (overrides the config file)
    #[arg(long, value_name = "URI", global = true)]
    uri: Option<String>,

    /// Use plain http instead of https
    #[arg(long, global = true)]
    http: bool,

    /// Report API errors in the output instead of failing
    #[arg(long = "no-errors", global = true)]
    no_errors: bool,

    /// Log requests and responses
    #[arg(long, short = 'd', global = true)]
    debug: bool,

    #[arg(long, env = "EBAY_CLIENT_ID", hide_env_values = true, global = true)]
    client_id: Option<String>,

    #[arg(long, env = "EBAY_CLIENT_SECRET", hide_env_values = true, global = true)]
    client_secret: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Execute an API call and print the response as JSON
    Call(CallArgs),

    /// Fetch an application token and print it
    Token,
}

#[derive(clap::Args, Debug)]
struct CallArgs {
    /// The API verb, e.g. GetItem
    #[arg(value_name = "VERB")]
    verb: String,

    /// JSON payload rendered into the request body
    #[arg(long, value_name = "JSON")]
    data: Option<String>,

    /// Response path to always treat as a list (repeatable)
    #[arg(long = "list-node", value_name = "PATH")]
    list_nodes: Vec<String>,

    /// Extra request header as NAME=VALUE (repeatable)
    #[arg(long = "header", value_name = "NAME=VALUE")]
    headers: Vec<String>,

    /// HTTP method (overrides the config file)
    #[arg(long, value_name = "METHOD")]
    method: Option<String>,
}

fn build_config(cli: &Cli) -> Result<ConnectionConfig> {
    let mut config = match &cli.config {
        Some(path) => ConnectionConfig::from_file(path)?,
        None => ConnectionConfig::default(),
    };

    if let Some(domain) = &cli.domain {
        config.domain = domain.clone();
    }
    if let Some(uri) = &cli.uri {
        config.uri = uri.clone();
    }
    if cli.http {
        config.https = false;
    }
    if cli.no_errors {
        config.errors = false;
    }
    if let Commands::Call(CallArgs {
        method: Some(method),
        ..
    }) = &cli.command
    {
        config.method = method.clone();
    }

    Ok(config)
}

fn parse_header(header: &str) -> Result<(String, String)> {
    header
        .split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| anyhow!("Invalid header '{}'. Expected NAME=VALUE.", header))
}

async fn run_call(mut connection: Connection, args: CallArgs) -> Result<()> {
    let payload = match &args.data {
        Some(data) => serde_json::from_str(data).context("--data is not valid JSON")?,
        None => serde_json::Value::Null,
    };

    let mut hooks = XmlHooks::new(connection.config().escape_xml);
    for header in &args.headers {
        let (name, value) = parse_header(header)?;
        hooks = hooks.header(name, value);
    }
    connection = connection.with_hooks(Arc::new(hooks));

    let mut call = Call::new(&args.verb).payload(payload);
    for node in args.list_nodes {
        call = call.list_node(node);
    }

    let response = connection
        .execute(call)
        .await?
        .with_context(|| format!("{} returned no response", args.verb))?;

    let dict = response
        .dict()
        .with_context(|| format!("Failed to parse {} response", args.verb))?;
    println!("{}", serde_json::to_string_pretty(&dict)?);

    if let Some(message) = response.error() {
        eprintln!("{}", message);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = build_config(&cli)?;
    let credentials =
        Credentials::from_parts(cli.client_id.as_deref(), cli.client_secret.as_deref())?;
    let connection = Connection::new(config, credentials)?;

    match cli.command {
        Commands::Call(args) => run_call(connection, args).await?,
        Commands::Token => {
            let token = connection.token_manager().get_token().await?;
            println!("{}", token);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_call_parsing() {
        let cli = Cli::try_parse_from([
            "ebay-connect",
            "call",
            "GetItem",
            "--data",
            r#"{"ItemID": "110"}"#,
            "--list-node",
            "item.variations",
            "--header",
            "X-EBAY-API-SITEID=0",
        ])
        .unwrap();
        match cli.command {
            Commands::Call(args) => {
                assert_eq!(args.verb, "GetItem");
                assert_eq!(args.data.as_deref(), Some(r#"{"ItemID": "110"}"#));
                assert_eq!(args.list_nodes, vec!["item.variations"]);
                assert_eq!(args.headers, vec!["X-EBAY-API-SITEID=0"]);
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "ebay-connect",
            "--domain",
            "api.sandbox.ebay.com",
            "--http",
            "--no-errors",
            "token",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Token));

        let config = build_config(&cli).unwrap();
        assert_eq!(config.domain, "api.sandbox.ebay.com");
        assert!(!config.https);
        assert!(!config.errors);
    }

    #[test]
    fn test_build_config_method_override() {
        let cli = Cli::try_parse_from(["ebay-connect", "call", "GetItem", "--method", "post"])
            .unwrap();
        let config = build_config(&cli).unwrap();
        assert_eq!(config.method, "post");
        assert!(config.https);
        assert!(config.errors);
    }

    #[test]
    fn test_cli_no_subcommand_fails() {
        let result = Cli::try_parse_from(["ebay-connect", "GetItem"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("X-EBAY-API-SITEID = 0").unwrap(),
            ("X-EBAY-API-SITEID".to_string(), "0".to_string())
        );
        assert!(parse_header("no-equals").is_err());
        assert!(parse_header("=value").is_err());
    }
}
