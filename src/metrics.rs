use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use log::info;
use prometheus::*;
use tokio::task::spawn_blocking;

use crate::config::PushOptions;

static METRIC_IMAGE_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("imsim_image_count", "count of the processed corpus images", &[
        "status"
    ])
    .unwrap()
});

static METRIC_EMBED_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!("imsim_embed_duration", "duration of the per-image embedding in seconds")
        .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "imsim_search_duration",
        "duration of the whole search in seconds",
        exponential_buckets(0.1, 2.0, 12).unwrap()
    )
    .unwrap()
});

static METRIC_SEARCH_MAX_SCORE: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "imsim_search_max_score",
        "similarity of the best match of each search",
        (-10..=10).map(|x| x as f64 / 10.0).collect()
    )
    .unwrap()
});

/// 图片的处理结果
#[derive(Debug, Clone, Copy)]
pub enum ImageStatus {
    Embedded,
    Cached,
    Failed,
}

impl ImageStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Embedded => "embedded",
            Self::Cached => "cached",
            Self::Failed => "failed",
        }
    }
}

pub fn inc_image_count(status: ImageStatus) {
    METRIC_IMAGE_COUNT.with_label_values(&[status.as_str()]).inc();
}

pub fn observe_embed_duration(duration: f32) {
    METRIC_EMBED_DURATION.observe(duration as f64);
}

pub fn observe_search_duration(duration: f32) {
    METRIC_SEARCH_DURATION.observe(duration as f64);
}

pub fn observe_search_max_score(score: f32) {
    METRIC_SEARCH_MAX_SCORE.observe(score as f64);
}

/// 将本次运行的指标推送到 Pushgateway，未配置地址时什么都不做
pub async fn push(opts: &PushOptions) -> Result<()> {
    let Some(url) = opts.prometheus_push.clone() else {
        return Ok(());
    };
    let instance = opts.prometheus_instance.clone().unwrap_or_else(|| "imsim".to_string());
    let auth = opts
        .prometheus_auth
        .as_deref()
        .map(|s| {
            let (username, password) =
                s.split_once(':').ok_or_else(|| anyhow!("认证信息格式应为 username:password"))?;
            Ok::<_, anyhow::Error>(BasicAuthentication {
                username: username.to_string(),
                password: password.to_string(),
            })
        })
        .transpose()?;

    let metric_families = prometheus::gather();
    spawn_blocking(move || {
        prometheus::push_metrics(
            "imsim",
            labels! {
                "instance".to_string() => instance,
            },
            &url,
            metric_families,
            auth,
        )
    })
    .await?
    .context("推送指标失败")?;
    info!("指标已推送");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_count() {
        let before = METRIC_IMAGE_COUNT.with_label_values(&["failed"]).get();
        inc_image_count(ImageStatus::Failed);
        assert!(METRIC_IMAGE_COUNT.with_label_values(&["failed"]).get() > before);
    }

    #[tokio::test]
    async fn test_push_without_url() {
        let opts = PushOptions { prometheus_push: None, prometheus_instance: None, prometheus_auth: None };
        assert!(push(&opts).await.is_ok());
    }

    #[tokio::test]
    async fn test_push_invalid_auth() {
        let opts = PushOptions {
            prometheus_push: Some("http://127.0.0.1:1".to_string()),
            prometheus_instance: None,
            prometheus_auth: Some("no-colon".to_string()),
        };
        assert!(push(&opts).await.is_err());
    }
}
