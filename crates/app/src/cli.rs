use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serveit_http::ServerArgs;

#[derive(Debug, Parser)]
#[command(name = "serveit", version, about = "Serve a fitted linear model over HTTP")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the prediction server.
    Serve(ServeArgs),
    /// Print the attributes the model exposes under /info/model.
    Inspect {
        /// Model definition in JSON.
        #[arg(long = "model", value_name = "PATH")]
        model: PathBuf,
    },
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Model definition in JSON.
    #[arg(long = "model", env = "SERVEIT_MODEL", value_name = "PATH")]
    pub model: PathBuf,
    /// Do not expose the model's attributes at /info/model.
    #[arg(long = "no-model-info", action = clap::ArgAction::SetTrue)]
    pub no_model_info: bool,
    #[command(flatten)]
    pub server: ServerArgs,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_accepts_server_flags() {
        let cli = Cli::try_parse_from([
            "serveit",
            "serve",
            "--model",
            "models/iris.json",
            "--port",
            "8000",
            "--no-model-info",
        ])
        .unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.model, PathBuf::from("models/iris.json"));
        assert_eq!(args.server.port, 8000);
        assert!(args.no_model_info);
    }

    #[test]
    fn inspect_requires_a_model() {
        assert!(Cli::try_parse_from(["serveit", "inspect"]).is_err());
    }
}
