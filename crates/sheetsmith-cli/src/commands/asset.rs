//! `sheetsmith asset <key> --prompt ...`

use crate::GlobalArgs;
use anyhow::Result;
use sheetsmith_pipeline::{AnimationParams, AssetRequest};

pub struct AssetArgs {
    pub key: String,
    pub prompt: String,
    pub frames: u32,
    pub width: u32,
    pub height: u32,
    pub fps: Option<u32>,
    pub looping: bool,
}

pub fn run(global: &GlobalArgs, args: AssetArgs) -> Result<()> {
    let request = build_request(args);
    request.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
    // single assets don't get a manifest; that's what `generate` is for
    super::run_requests(global, &[request], false)
}

fn build_request(args: AssetArgs) -> AssetRequest {
    let request = AssetRequest::still(args.key, args.prompt, args.width, args.height, args.frames);
    match args.fps {
        Some(fps) => request.animated(AnimationParams {
            fps,
            looping: args.looping,
        }),
        None => request,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(fps: Option<u32>) -> AssetArgs {
        AssetArgs {
            key: "anubis_spell".to_string(),
            prompt: "anubis casting".to_string(),
            frames: 6,
            width: 64,
            height: 64,
            fps,
            looping: false,
        }
    }

    #[test]
    fn test_fps_makes_animation() {
        let request = build_request(args(Some(8)));
        assert_eq!(request.animation, Some(AnimationParams { fps: 8, looping: false }));
        assert!(!build_request(args(None)).is_animated());
    }
}
