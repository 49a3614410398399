//! Provider status callbacks
//!
//! Providers report device lifecycle over a side channel; each report is
//! one [`StatusEvent`] applied to the registry. The transport that
//! carries the reports lives outside this crate; this module is the
//! boundary where they take effect.

use serde::Deserialize;

use crate::net::censor_udid;
use crate::registry::{DeviceRegistry, Geometry, Subsystem};

/// A device lifecycle report from a provider
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StatusEvent {
    /// Provider sees the device; binds it and records its dimensions
    Exists {
        udid: String,
        width: i32,
        height: i32,
        #[serde(rename = "clickWidth")]
        click_width: i32,
        #[serde(rename = "clickHeight")]
        click_height: i32,
    },
    /// Raw capability JSON for the device
    Info { udid: String, info: String },
    WdaStarted { udid: String, port: u16 },
    WdaStopped { udid: String },
    CfaStarted { udid: String },
    CfaStopped { udid: String },
    VideoStarted { udid: String },
    VideoStopped { udid: String },
    /// Provider stopped serving the device; unbinds it
    ProvisionStopped { udid: String },
    /// Orientation change, relayed live to the device's notice socket
    Orientation { udid: String, orientation: String },
}

impl StatusEvent {
    pub fn udid(&self) -> &str {
        match self {
            StatusEvent::Exists { udid, .. }
            | StatusEvent::Info { udid, .. }
            | StatusEvent::WdaStarted { udid, .. }
            | StatusEvent::WdaStopped { udid }
            | StatusEvent::CfaStarted { udid }
            | StatusEvent::CfaStopped { udid }
            | StatusEvent::VideoStarted { udid }
            | StatusEvent::VideoStopped { udid }
            | StatusEvent::ProvisionStopped { udid }
            | StatusEvent::Orientation { udid, .. } => udid,
        }
    }
}

/// Apply a status event to the registry
///
/// Returns whether the event took effect; subsystem flags for a device
/// that is not bound are dropped, matching the registry's rule that
/// status exists only while bound.
pub async fn apply_status(
    registry: &DeviceRegistry,
    provider_id: i64,
    event: StatusEvent,
) -> bool {
    match event {
        StatusEvent::Exists {
            udid,
            width,
            height,
            click_width,
            click_height,
        } => {
            registry.bind_device(&udid, provider_id).await;
            registry
                .set_geometry(
                    &udid,
                    Geometry {
                        width,
                        height,
                        click_width,
                        click_height,
                    },
                )
                .await;
            true
        }
        StatusEvent::Info { udid, info } => {
            registry.set_capabilities(&udid, &info).await;
            true
        }
        StatusEvent::WdaStarted { udid, port } => {
            tracing::info!(udid = %censor_udid(&udid), port, "Automation driver up");
            set_flag(registry, &udid, Subsystem::Wda, true).await
        }
        StatusEvent::WdaStopped { udid } => set_flag(registry, &udid, Subsystem::Wda, false).await,
        StatusEvent::CfaStarted { udid } => set_flag(registry, &udid, Subsystem::Cfa, true).await,
        StatusEvent::CfaStopped { udid } => set_flag(registry, &udid, Subsystem::Cfa, false).await,
        StatusEvent::VideoStarted { udid } => {
            set_flag(registry, &udid, Subsystem::Video, true).await
        }
        StatusEvent::VideoStopped { udid } => {
            set_flag(registry, &udid, Subsystem::Video, false).await
        }
        StatusEvent::ProvisionStopped { udid } => {
            registry.unbind_device(&udid).await;
            true
        }
        StatusEvent::Orientation { udid, orientation } => {
            registry.set_orientation(&udid, &orientation).await;
            if let Some(notice) = registry.notice(&udid).await {
                let msg = format!(
                    r#"{{"type":"orientation","orientation":"{}"}}"#,
                    orientation
                );
                if let Err(e) = notice.send_text(&msg).await {
                    tracing::debug!(udid = %censor_udid(&udid), error = %e,
                        "Orientation notice not delivered");
                }
            }
            true
        }
    }
}

async fn set_flag(registry: &DeviceRegistry, udid: &str, subsystem: Subsystem, up: bool) -> bool {
    if registry.provider_for(udid).await.is_none() {
        tracing::debug!(udid = %censor_udid(udid), "Status report for unbound device");
        return false;
    }
    registry.set_status(udid, subsystem, up).await;
    true
}

/// Drop the device's current viewer by kicking its relay pipeline
pub async fn kick_viewer(registry: &DeviceRegistry, udid: &str) -> bool {
    registry.kick(udid).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    use super::*;
    use crate::error::Result;
    use crate::registry::{FrameSink, NoticeConn};

    struct RecorderSink {
        tx: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl FrameSink for RecorderSink {
        async fn send_text(&mut self, text: &str) -> Result<()> {
            let _ = self.tx.send(text.to_string());
            Ok(())
        }
        async fn send_binary(&mut self, _data: Bytes) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_parse_events() {
        let event: StatusEvent = serde_json::from_str(
            r#"{"status":"exists","udid":"d1","width":390,"height":844,"clickWidth":390,"clickHeight":844}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            StatusEvent::Exists {
                udid: "d1".into(),
                width: 390,
                height: 844,
                click_width: 390,
                click_height: 844,
            }
        );

        let event: StatusEvent =
            serde_json::from_str(r#"{"status":"wdaStarted","udid":"d1","port":8107}"#).unwrap();
        assert_eq!(
            event,
            StatusEvent::WdaStarted {
                udid: "d1".into(),
                port: 8107
            }
        );

        let event: StatusEvent =
            serde_json::from_str(r#"{"status":"provisionStopped","udid":"d1"}"#).unwrap();
        assert_eq!(event.udid(), "d1");

        assert!(serde_json::from_str::<StatusEvent>(r#"{"status":"bogus"}"#).is_err());
    }

    #[tokio::test]
    async fn test_exists_binds_and_records_geometry() {
        let registry = DeviceRegistry::new();
        let bound = apply_status(
            &registry,
            3,
            StatusEvent::Exists {
                udid: "d1".into(),
                width: 390,
                height: 844,
                click_width: 390,
                click_height: 844,
            },
        )
        .await;

        assert!(bound);
        assert_eq!(registry.provider_for("d1").await, Some(3));
        assert_eq!(registry.info("d1").await.geometry.unwrap().width, 390);

        assert!(apply_status(&registry, 3, StatusEvent::CfaStarted { udid: "d1".into() }).await);
        assert_eq!(registry.status("d1").await.unwrap().cfa, Some(true));
    }

    #[tokio::test]
    async fn test_provision_stopped_unbinds_but_keeps_info() {
        let registry = DeviceRegistry::new();
        apply_status(
            &registry,
            3,
            StatusEvent::Exists {
                udid: "d1".into(),
                width: 390,
                height: 844,
                click_width: 390,
                click_height: 844,
            },
        )
        .await;
        apply_status(
            &registry,
            3,
            StatusEvent::Info {
                udid: "d1".into(),
                info: r#"{"model":"X"}"#.into(),
            },
        )
        .await;

        apply_status(&registry, 3, StatusEvent::ProvisionStopped { udid: "d1".into() }).await;

        assert_eq!(registry.provider_for("d1").await, None);
        assert_eq!(registry.status("d1").await, None);
        assert_eq!(registry.info("d1").await.capabilities_json, r#"{"model":"X"}"#);
    }

    #[tokio::test]
    async fn test_status_for_unbound_device_is_rejected() {
        let registry = DeviceRegistry::new();
        assert!(!apply_status(&registry, 3, StatusEvent::WdaStopped { udid: "ghost".into() }).await);
    }

    #[tokio::test]
    async fn test_orientation_reaches_notice_socket() {
        let registry = Arc::new(DeviceRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry
            .attach_notice("d1", NoticeConn::new(Box::new(RecorderSink { tx })))
            .await;

        apply_status(
            &registry,
            3,
            StatusEvent::Orientation {
                udid: "d1".into(),
                orientation: "landscape".into(),
            },
        )
        .await;

        assert_eq!(
            rx.recv().await.unwrap(),
            r#"{"type":"orientation","orientation":"landscape"}"#
        );
        assert_eq!(registry.info("d1").await.orientation, "landscape");
    }
}
