//! Terminal stand-ins for the browser collaborators.
//!
//! The host prints navigation and toasts, the recognizer turns stdin lines
//! into finalized speech results, and the synthesizer "speaks" to stderr.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use advisor::host::{Host, Toast, ToastKind};
use advisor::voice::{RecognitionEvent, RecognitionOptions, SpeechRecognizer, SpeechSession, SpeechSynthesizer, VoiceError};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

// =============================================================================
// HOST
// =============================================================================

pub struct ConsoleHost {
    page: Mutex<String>,
}

impl ConsoleHost {
    pub fn new() -> Self {
        Self { page: Mutex::new("/".to_string()) }
    }
}

impl Default for ConsoleHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for ConsoleHost {
    fn navigate(&self, path: &str) {
        path.clone_into(&mut self.page.lock().unwrap_or_else(PoisonError::into_inner));
        println!("  → {path}");
    }

    fn current_page(&self) -> String {
        self.page.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn toast(&self, toast: Toast) {
        let marker = match toast.kind {
            ToastKind::Info => "i",
            ToastKind::Success => "✓",
            ToastKind::Error => "!",
        };
        match toast.description {
            Some(description) => println!("  [{marker}] {}: {description}", toast.title),
            None => println!("  [{marker}] {}", toast.title),
        }
    }

    fn set_open(&self, open: bool) {
        debug!(open, "console: panel toggled");
    }
}

// =============================================================================
// RECOGNIZER
// =============================================================================

/// Every non-empty stdin line is one finalized result. End of input is
/// reported through [`StdinRecognizer::closed`], not as an engine end, so
/// it does not trigger restarts.
pub struct StdinRecognizer {
    lines: Arc<tokio::sync::Mutex<Lines<BufReader<Stdin>>>>,
    closed: Arc<Notify>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl StdinRecognizer {
    pub fn new() -> Self {
        Self {
            lines: Arc::new(tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin()).lines())),
            closed: Arc::new(Notify::new()),
            reader: Mutex::new(None),
        }
    }

    /// Notified once stdin is exhausted.
    pub fn closed(&self) -> Arc<Notify> {
        Arc::clone(&self.closed)
    }
}

impl Default for StdinRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SpeechRecognizer for StdinRecognizer {
    fn is_supported(&self) -> bool {
        true
    }

    async fn start(&self, options: &RecognitionOptions) -> Result<mpsc::Receiver<RecognitionEvent>, VoiceError> {
        debug!(language = %options.language, "console: reading speech from stdin");
        let (tx, rx) = mpsc::channel(16);
        let lines = Arc::clone(&self.lines);
        let closed = Arc::clone(&self.closed);
        let handle = tokio::spawn(async move {
            loop {
                let next = lines.lock().await.next_line().await;
                let event = match next {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => RecognitionEvent::Final(line.trim().to_string()),
                    Ok(None) => {
                        closed.notify_one();
                        // Hold the channel open until stopped.
                        std::future::pending::<()>().await;
                        return;
                    }
                    Err(e) => RecognitionEvent::Error(e.kind().to_string()),
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        if let Some(previous) = self.reader.lock().unwrap_or_else(PoisonError::into_inner).replace(handle) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn stop(&self) {
        if let Some(handle) = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}

// =============================================================================
// SYNTHESIZER
// =============================================================================

pub struct ConsoleSynthesizer;

struct ConsoleSession {
    connected: AtomicBool,
}

#[async_trait::async_trait]
impl SpeechSynthesizer for ConsoleSynthesizer {
    async fn connect(&self, language: &str) -> Result<Arc<dyn SpeechSession>, VoiceError> {
        debug!(language, "console: synthesis session opened");
        Ok(Arc::new(ConsoleSession { connected: AtomicBool::new(true) }))
    }
}

#[async_trait::async_trait]
impl SpeechSession for ConsoleSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn speak(&self, text: &str) -> Result<(), VoiceError> {
        eprintln!("  (spricht) {text}");
        Ok(())
    }

    async fn end(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
