//! Check ffmpeg encoders and caption fonts.

use dubline_common::config::AppConfig;
use dubline_render_engine::ffmpeg::resolve_profile;
use dubline_render_engine::{FfmpegCapabilities, FontBook};

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Dubline System Check");
    println!("{}", "=".repeat(50));

    let mut ready = true;

    match FfmpegCapabilities::probe("ffmpeg") {
        Ok(caps) => {
            println!(
                "[OK] ffmpeg: {} encoders, {} muxers",
                caps.encoders.len(),
                caps.muxers.len()
            );
            let mut any = false;
            for mime in &config.export.mime_preferences {
                match resolve_profile(mime, &caps) {
                    Some(profile) => {
                        any = true;
                        println!(
                            "     {mime}: {} + {} in {}",
                            profile.video_encoder, profile.audio_encoder, profile.muxer
                        );
                    }
                    None => println!("     {mime}: not available"),
                }
            }
            if !any {
                ready = false;
                println!("[FAIL] None of the preferred recording formats can be encoded");
            }
        }
        Err(e) => {
            ready = false;
            println!("[FAIL] ffmpeg: {e}");
            println!("       Install ffmpeg or use `dubline export --raw`.");
        }
    }

    match FontBook::from_config(&config.fonts) {
        Ok(book) => match book.default_path() {
            Some(path) => println!("[OK] Caption font: {}", path.display()),
            None => {
                ready = false;
                println!("[WARN] No caption font found; set fonts.default_font in the config");
            }
        },
        Err(e) => {
            ready = false;
            println!("[FAIL] Fonts: {e}");
        }
    }

    println!(
        "[OK] Config: {}",
        dubline_common::config::config_file_path().display()
    );

    println!();
    if ready {
        println!("Everything needed for export is available.");
    } else {
        println!("Some capabilities are missing. See above for fixes.");
    }

    Ok(())
}
