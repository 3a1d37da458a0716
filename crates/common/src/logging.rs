use tracing_core::Level;
use tracing_subscriber::{filter::Targets, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Install the global log subscriber.
///
/// AWS SDK internals are noisy on lower levels, so their
/// targets are capped regardless of the configured level.
pub fn init(config: &Config) {
    let fmt = fmt::format().with_target(false).compact();

    let target_filters = Targets::new()
        .with_target("aws_config", Level::WARN)
        .with_target("aws_smithy_runtime", Level::WARN)
        .with_target("aws_sdk_s3", Level::WARN)
        .with_target("aws_sdk_sesv2", Level::WARN)
        .with_target("hyper", Level::WARN)
        .with_default(config.logging.level);

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(fmt))
        .with(target_filters)
        .init();
}
