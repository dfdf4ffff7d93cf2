use env_logger::Env;

#[tokio::main]
async fn main() -> coin_pulse::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    coin_pulse::app::run().await
}
