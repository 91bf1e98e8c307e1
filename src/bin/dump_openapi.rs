fn main() -> anyhow::Result<()> {
    let port = std::env::var("APP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(authgate::config::DEFAULT_PORT);

    let doc = authgate::docs::build_openapi(port)?;
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}
