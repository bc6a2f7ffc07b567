use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use warp::Filter;

mod args;
mod auth;
mod backend;
mod feedback;
mod feedbox;
mod form;
mod routes;
mod user;
mod views;

use args::Args;
use backend::Backend;
use feedbox::FeedBox;
use routes::Context;

#[tokio::main]
async fn main() -> ExitCode {
    pretty_env_logger::init_custom_env("FEEDBOX_LOG");

    let args = Args::parse();

    let addr = match args.addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid address: {e}");
            return ExitCode::FAILURE;
        }
    };

    let backend = match Backend::new(args.data_dir()).await {
        Ok(backend) => backend,
        Err(e) => {
            error!("couldn't open database in {}: {e}", args.data_dir().display());
            return ExitCode::FAILURE;
        }
    };

    let feedbox = match FeedBox::new(backend, args.hash_cost()) {
        Ok(feedbox) => Arc::new(feedbox),
        Err(e) => {
            error!("invalid hash cost {}: {e}", args.hash_cost());
            return ExitCode::FAILURE;
        }
    };

    let routes = routes::routes(Context::new(feedbox, args.secure())).with(warp::log("feedbox"));

    info!("listening on {addr}");
    warp::serve(routes).run(addr).await;

    ExitCode::SUCCESS
}
