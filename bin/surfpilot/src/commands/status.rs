use surfpilot_core::{Config, Paths};
use surfpilot_tools::browser::launcher::find_browser_binary;

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("surfpilot status");
    println!("================");
    println!();

    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_exists { "✓" } else { "✗ (not found, using defaults)" }
    );

    let config = Config::load_or_default(&paths)?;
    let defaults = &config.agents.defaults;

    println!("Model:     {}", defaults.model);
    println!("Provider:  {}", config.provider_name());
    println!(
        "API key:   {}",
        if config.api_key().is_some() { "✓ configured" } else { "✗ missing (set providers.*.apiKey or OPENAI_API_KEY)" }
    );
    println!("Backend:   {:?}", defaults.backend);
    println!("Display:   {}x{} ({})", defaults.display_width, defaults.display_height, defaults.environment.as_str());
    println!("Start URL: {}", defaults.start_url);
    if !defaults.blocked_domains.is_empty() {
        println!("Blocked:   {}", defaults.blocked_domains.join(", "));
    }

    println!();
    match config.browser.executable.as_deref().filter(|e| !e.trim().is_empty()) {
        Some(exe) => println!("Browser:   {} (configured)", exe),
        None => match find_browser_binary() {
            Some(found) => println!("Browser:   {} ✓", found),
            None => println!("Browser:   ✗ no Chrome/Chromium/Edge found"),
        },
    }
    println!("Profiles:  {}", config.profiles_dir(&paths).display());
    println!("Gateway:   {}:{}", config.gateway.host, config.gateway.port);

    Ok(())
}
