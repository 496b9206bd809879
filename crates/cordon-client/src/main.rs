//! `cordon-run` binary entry point.

use std::process;

#[tokio::main]
async fn main() {
    process::exit(cordon_client::run().await);
}
