use acme2_autocert::CertManager;
use acme2_autocert::Config;
use acme2_autocert::Domain;
use acme2_autocert::Error;
use acme2_autocert::Providers;
use std::io::Write;
use std::net::TcpListener;
use tracing::info;
use tracing::warn;

const ADDR: &str = "127.0.0.1:8443";

#[tokio::main]
async fn main() -> Result<(), Error> {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  // A self-signed certificate needs no validation authority. To use an
  // ACME server instead, leave `self_signed` unset and pass a
  // `ValidationClientFactory` through `Providers::new`.
  let mut config = Config::new(Domain::new("localhost"));
  config.self_signed = true;
  let manager = CertManager::initialize(config, Providers::default()).await?;
  let acceptor = manager.acceptor()?;

  let listener = TcpListener::bind(ADDR)
    .map_err(|err| Error::Configuration(err.to_string()))?;
  info!(addr = ADDR, "Try `curl -k --resolve localhost:8443:127.0.0.1 https://localhost:8443`");

  // Blocking for brevity; a real server hands the acceptor to tokio-openssl.
  for stream in listener.incoming() {
    let stream = match stream {
      Ok(stream) => stream,
      Err(err) => {
        warn!(error = %err, "Accept failed");
        continue;
      }
    };
    match acceptor.accept(stream) {
      Ok(mut tls) => {
        let _ = tls.write_all(
          b"HTTP/1.1 200 OK\r\ncontent-length: 6\r\nconnection: close\r\n\r\nhello\n",
        );
      }
      Err(err) => warn!(error = %err, "Handshake failed"),
    }
  }

  manager.shutdown().await;
  Ok(())
}
