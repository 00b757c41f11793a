//! List available audio input devices

use roleplay_audio::cpal_backend::CpalBackend;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    CpalBackend::print_devices()?;
    Ok(())
}
