use anyhow::Result;
use crossbeam_channel::Sender;
use std::{
    io::BufRead,
    sync::Arc,
    thread,
    time::Duration,
};
use tracing::{error, info, warn};

use open_music_engine::{
    audio::{decoder::FfmpegDecoder, sink::PipeConnector},
    bot::{commands, GuildManager},
    config::Config,
    sources::YtDlpResolver,
};

fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_music_engine=debug".parse()?),
        )
        .init();

    info!("🎵 Iniciando Open Music Engine v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads.max(1))
        .enable_all()
        .build()?;

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return runtime.block_on(health_check(&config));
    }

    let resolver = Arc::new(YtDlpResolver::new(
        config.ytdlp_path.clone(),
        config.resolve_timeout(),
    ));
    if let Err(e) = runtime.block_on(resolver.verify_dependencies()) {
        warn!("⚠️ yt-dlp no disponible, solo funcionarán streams directos: {}", e);
    }

    let manager = Arc::new(GuildManager::new(
        Arc::new(PipeConnector::new(
            config.output_dir.clone(),
            config.native_sample_rate,
        )),
        resolver,
        Arc::new(FfmpegDecoder::new(
            config.ffmpeg_path.clone(),
            config.ffprobe_path.clone(),
            config.decode_unit_bytes,
        )),
        runtime.handle().clone(),
        config.pipeline_config(),
        config.session_settings(),
        config.join_timeout(),
        config.max_playlist_size,
    ));

    // Manejar shutdown graceful
    {
        let manager = manager.clone();
        runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                error!("Error al registrar Ctrl+C");
                return;
            }
            info!("⚠️ Señal de shutdown recibida, cerrando...");
            let _ = tokio::task::spawn_blocking(move || manager.shutdown()).await;
            std::process::exit(0);
        });
    }

    // Las respuestas se imprimen desde un solo hilo
    let (replies, printer) = crossbeam_channel::unbounded::<String>();
    let printer = thread::spawn(move || {
        for reply in printer {
            println!("{}", reply);
        }
    });

    info!("🚀 Motor iniciado, esperando comandos en stdin");
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        dispatch(&manager, line, replies.clone());
    }

    info!("📭 Entrada cerrada, deteniendo sesiones");
    // Dar tiempo a los comandos en vuelo antes de cerrar
    thread::sleep(Duration::from_millis(200));
    manager.shutdown();
    drop(replies);
    let _ = printer.join();
    runtime.shutdown_timeout(Duration::from_secs(2));

    Ok(())
}

/// Ejecuta el comando en su propio hilo; nunca bloquea la lectura de stdin
fn dispatch(manager: &Arc<GuildManager>, line: String, replies: Sender<String>) {
    let manager = manager.clone();
    let spawned = thread::Builder::new()
        .name("command".into())
        .spawn(move || {
            let reply = match commands::parse_line(&line) {
                Ok((guild_id, command)) => match commands::execute(&manager, guild_id, command) {
                    Ok(reply) => format!("[{}] {}", guild_id, reply),
                    Err(e) => format!("[{}] ❌ {}", guild_id, e),
                },
                Err(e) => format!("❌ {}", e),
            };
            let _ = replies.send(reply);
        });

    if let Err(e) = spawned {
        error!("❌ No se pudo lanzar el hilo del comando: {}", e);
    }
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = tokio::process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = tokio::process::Command::new(&config.ffmpeg_path)
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
