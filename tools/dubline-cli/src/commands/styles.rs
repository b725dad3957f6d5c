//! List caption style presets.

use dubline_common::config::AppConfig;
use dubline_cue_model::style::StyleLibrary;

pub fn run(config: &AppConfig, json: bool) -> anyhow::Result<()> {
    let library = StyleLibrary::from_defaults(&config.captions);

    if json {
        println!("{}", serde_json::to_string_pretty(library.styles())?);
        return Ok(());
    }

    for style in library.styles() {
        let marker = if style.name.eq_ignore_ascii_case(&config.captions.style) {
            "*"
        } else {
            " "
        };
        let mut traits = Vec::new();
        if style.stroke_color.is_some() {
            traits.push("outline");
        }
        if style.background_color.is_some() {
            traits.push("box");
        }
        if style.has_shadow() {
            traits.push("shadow");
        }
        if style.is_neon {
            traits.push("neon");
        }
        println!(
            "{marker} {:<12} {} {}  {}",
            style.name,
            style.text_color,
            style.font_family,
            traits.join(", ")
        );
    }

    Ok(())
}
