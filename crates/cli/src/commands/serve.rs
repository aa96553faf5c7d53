//! `flavia serve`: start the HTTP gateway.

pub async fn run(port: Option<u16>, host: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config()?;

    if let Some(port) = port {
        config.gateway.port = port;
    }
    if let Some(host) = host {
        config.gateway.host = host;
    }

    let agent = super::build_agent(&config)?;

    println!("Flavia gateway");
    println!("  Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    println!("  Chat:      POST /flavia/chat/");

    flavia_gateway::start(&config.gateway, agent).await?;

    Ok(())
}
