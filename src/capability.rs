//! Per-capability endpoint profiles.
//!
//! Every vendor capability shares the same submit/poll client; a profile only
//! says where to send the request, whether the answer comes back directly or
//! as a job, and how the resulting job is polled.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::client::JobProtocol;

/// Default vendor host for the built-in profiles.
pub const DEFAULT_API_HOST: &str = "https://api.stability.ai";

/// Length of image-to-video generation ids.
pub const VIDEO_ID_LEN: usize = 64;

/// Edge length of the square input image-to-video expects.
pub const VIDEO_INPUT_EDGE: u32 = 768;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// The POST response carries the artifact.
    Sync,
    /// The POST response carries a job id to poll.
    Async,
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Async => write!(f, "async"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    pub name: String,
    pub submit_url: String,
    pub mode: DeliveryMode,
    #[serde(default)]
    pub protocol: JobProtocol,
    /// Exact (width, height) uploaded images are resized to before sending.
    #[serde(default)]
    pub resize: Option<(u32, u32)>,
}

impl CapabilityProfile {
    pub fn sync(name: &str, submit_url: String) -> Self {
        Self {
            name: name.to_string(),
            submit_url,
            mode: DeliveryMode::Sync,
            protocol: JobProtocol::default(),
            resize: None,
        }
    }

    pub fn asynchronous(name: &str, submit_url: String, protocol: JobProtocol) -> Self {
        Self {
            name: name.to_string(),
            submit_url,
            mode: DeliveryMode::Async,
            protocol,
            resize: None,
        }
    }

    pub fn with_resize(mut self, width: u32, height: u32) -> Self {
        self.resize = Some((width, height));
        self
    }
}

/// Built-in profiles rooted at `api_host`.
pub fn builtin_profiles(api_host: &str) -> Vec<CapabilityProfile> {
    let host = api_host.trim_end_matches('/');
    let url = |path: &str| format!("{host}{path}");
    let results = JobProtocol::new(url("/v2beta/results/{id}"));

    vec![
        CapabilityProfile::sync("core", url("/v2beta/stable-image/generate/core")),
        CapabilityProfile::sync("control-sketch", url("/v2beta/stable-image/control/sketch")),
        CapabilityProfile::sync(
            "control-structure",
            url("/v2beta/stable-image/control/structure"),
        ),
        CapabilityProfile::sync(
            "search-and-recolor",
            url("/v2beta/stable-image/edit/search-and-recolor"),
        ),
        CapabilityProfile::sync(
            "search-and-replace",
            url("/v2beta/stable-image/edit/search-and-replace"),
        ),
        CapabilityProfile::asynchronous(
            "replace-background-and-relight",
            url("/v2beta/stable-image/edit/replace-background-and-relight"),
            results.clone(),
        ),
        CapabilityProfile::asynchronous(
            "upscale-creative",
            url("/v2beta/stable-image/upscale/creative"),
            results,
        ),
        CapabilityProfile::asynchronous(
            "image-to-video",
            url("/v2beta/image-to-video"),
            JobProtocol::new(url("/v2beta/image-to-video/result/{id}"))
                .with_expected_id_len(VIDEO_ID_LEN)
                .with_result_accept("video/*"),
        )
        .with_resize(VIDEO_INPUT_EDGE, VIDEO_INPUT_EDGE),
    ]
}

/// Load profiles from a JSON array.
pub fn load_profiles(path: &Path) -> anyhow::Result<Vec<CapabilityProfile>> {
    let json = std::fs::read_to_string(path)?;
    let profiles = serde_json::from_str(&json)?;
    Ok(profiles)
}

/// Index profiles by name. Later entries win on duplicate names.
pub fn index_profiles(profiles: Vec<CapabilityProfile>) -> BTreeMap<String, CapabilityProfile> {
    profiles.into_iter().map(|p| (p.name.clone(), p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_every_capability() {
        let profiles = index_profiles(builtin_profiles(DEFAULT_API_HOST));
        assert_eq!(profiles.len(), 8);

        let sync = profiles
            .values()
            .filter(|p| p.mode == DeliveryMode::Sync)
            .count();
        assert_eq!(sync, 5);
    }

    #[test]
    fn video_profile_checks_id_and_resizes() {
        let profiles = index_profiles(builtin_profiles("http://localhost:9000/"));
        let video = &profiles["image-to-video"];

        assert_eq!(video.submit_url, "http://localhost:9000/v2beta/image-to-video");
        assert_eq!(video.protocol.expected_id_len, Some(64));
        assert_eq!(video.protocol.result_accept, "video/*");
        assert_eq!(video.resize, Some((768, 768)));
        assert_eq!(
            video.protocol.status_url_for("abc"),
            "http://localhost:9000/v2beta/image-to-video/result/abc"
        );
    }

    #[test]
    fn upscale_polls_shared_results_endpoint() {
        let profiles = index_profiles(builtin_profiles(DEFAULT_API_HOST));
        assert_eq!(
            profiles["upscale-creative"].protocol.status_url_for("j1"),
            "https://api.stability.ai/v2beta/results/j1"
        );
    }

    #[test]
    fn profiles_parse_from_json_with_defaults() {
        let json = r#"[
            {"name": "draft", "submit_url": "http://h/draft", "mode": "sync"},
            {
                "name": "render",
                "submit_url": "http://h/render",
                "mode": "async",
                "protocol": {
                    "status_url": "http://h/render/{id}",
                    "completion": {"kind": "body_flag", "field": "state", "pending": ["running"], "failed": ["error"]},
                    "on_server_error": {"policy": "retry", "max_retries": 3}
                },
                "resize": [512, 512]
            }
        ]"#;

        let profiles: Vec<CapabilityProfile> = serde_json::from_str(json).unwrap();
        assert_eq!(profiles[0].protocol.id_field, "id");
        assert_eq!(profiles[1].mode, DeliveryMode::Async);
        assert_eq!(profiles[1].resize, Some((512, 512)));
        assert_eq!(
            profiles[1].protocol.on_server_error,
            Some(crate::client::ServerErrorPolicy::Retry { max_retries: 3 })
        );
        assert_eq!(profiles[0].protocol.on_server_error, None);
    }

    #[test]
    fn mode_display() {
        assert_eq!(DeliveryMode::Sync.to_string(), "sync");
        assert_eq!(DeliveryMode::Async.to_string(), "async");
    }
}
