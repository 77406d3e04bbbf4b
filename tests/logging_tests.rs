use elios4you::logging::{LogContext, get_logger_with_context, min_level, parse_log_level};
use tracing::Level;

#[test]
fn parse_log_level_accepts_aliases() {
    assert_eq!(parse_log_level("warning").unwrap(), Level::WARN);
    assert_eq!(parse_log_level("Debug").unwrap(), Level::DEBUG);
    assert!(parse_log_level("loud").is_err());
}

#[test]
fn min_level_picks_more_verbose() {
    assert_eq!(min_level(Level::INFO, Level::DEBUG), Level::DEBUG);
    assert_eq!(min_level(Level::ERROR, Level::WARN), Level::WARN);
}

#[test]
fn contextual_logger_can_log_without_subscriber() {
    let logger = get_logger_with_context(
        LogContext::new("client")
            .with_device("Roof")
            .with_field("host", "192.168.1.50".to_string()),
    );
    logger.info("hello");
    logger.debug("details");
}
