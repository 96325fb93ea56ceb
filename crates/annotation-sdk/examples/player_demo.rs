//! 播放器批注演示
//!
//! 连接 Phoenix 服务端，加入 `videos:{id}` 话题，按播放进度打印批注。
//!
//! ```text
//! cargo run --example player_demo -- ws://localhost:4000/socket 42 "nice cut"
//! ```
//!
//! 设置 `ANNOTATION_DEBUG=1` 输出调试日志。

use annotation_sdk::{
    Annotation, AnnotationConfig, AnnotationLine, AnnotationSession, MediaClock, SessionEvent,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let server_url = args.next().unwrap_or_else(|| "ws://localhost:4000/socket".to_string());
    let video_id = args.next().unwrap_or_else(|| "1".to_string());
    let note = args.next();
    let debug = std::env::var("ANNOTATION_DEBUG").is_ok();

    println!("\n🎬 批注同步演示\n");
    println!("====================================\n");

    let config = AnnotationConfig::builder()
        .server_url(server_url)
        .poll_interval_ms(500)
        .debug_mode(debug)
        .build()?;

    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(config.log_level())
        .init();

    let clock = Arc::new(MediaClock::new());
    let session = AnnotationSession::with_phoenix(
        config,
        &video_id,
        clock.clone(),
        Arc::new(|annotation: &Annotation| {
            println!("💬 {}", AnnotationLine::from(annotation));
        }),
    )?;

    session.events().add_listener("*", |event: &SessionEvent| match event {
        SessionEvent::PushFailed { reason, .. } => println!("⚠️ 提交失败: {}", reason),
        SessionEvent::JoinFailed { reason, .. } => println!("❌ 加入失败: {}", reason),
        SessionEvent::TransportDisconnected { .. } => println!("🔌 连接已断开"),
        _ => {}
    });

    session.connect().await?;
    clock.play();
    println!("📺 已加入 {}，待展示 {} 条\n", session.topic(), session.pending_count());

    if let Some(note) = note {
        tokio::time::sleep(Duration::from_secs(2)).await;
        session.submit_and_wait(&note).await?;
        println!("📤 已提交: {}", note);
    }

    println!("按 Ctrl+C 退出...\n");
    tokio::signal::ctrl_c().await?;

    session.leave().await?;
    println!("\n👋 已离开，最后游标 last_seen_id={}", session.last_seen_id());
    Ok(())
}
