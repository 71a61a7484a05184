use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, ScreeningError};
use crate::service::ScreeningService;

/// Runs one screening over a line-oriented terminal.
///
/// Each question is asked again until its answer satisfies the answer policy. A failed
/// generation can be retried as often as the user likes; the answers are kept.
pub async fn run<R, W>(service: &ScreeningService, input: R, mut out: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    let title = &service.config().server.name;
    out.write_all(format!("{title}\nSomatic Complaints & Risk Assessment\n\n").as_bytes())
        .await?;
    out.write_all(
        b"Welcome. This tool assists in screening patients with somatic complaints for underlying mental health risks.\n\
          Press Enter to start screening.\n",
    )
    .await?;
    out.flush().await?;

    if lines.next_line().await?.is_none() {
        return Ok(());
    }

    let mut session = service.new_session();
    session.start();

    for index in 0..session.questions().len() {
        loop {
            let question = &session.questions()[index];
            out.write_all(format!("\n{question}\n> ").as_bytes()).await?;
            out.flush().await?;

            let Some(line) = lines.next_line().await? else {
                anyhow::bail!("input closed before question {} was answered", index + 1);
            };
            session.set_answer(index, line)?;
            if session.is_answered(index) {
                break;
            }
            out.write_all(b"Please answer this question.\n").await?;
        }
    }

    session.submit()?;

    loop {
        out.write_all(b"\nGenerating AI Summary...\n").await?;
        out.flush().await?;

        match service.generate(&session).await {
            Ok(summary) => {
                out.write_all(format!("Summary Generated\n---\n{}\n", summary.text).as_bytes())
                    .await?;
                out.flush().await?;
                return Ok(());
            }
            Err(e) if e.is_backend_failure() => {
                report_failure(service, &e, &mut out).await?;
                out.write_all(b"Retry? [y/N] ").await?;
                out.flush().await?;
                let retry = lines
                    .next_line()
                    .await?
                    .is_some_and(|l| l.trim().eq_ignore_ascii_case("y"));
                if !retry {
                    return Ok(());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn report_failure<W: AsyncWrite + Unpin>(
    service: &ScreeningService,
    err: &ScreeningError,
    out: &mut W,
) -> Result<()> {
    let mut message = format!("Error communicating with Ollama: {err}\n");
    if let Some(hint) = service.remediation_hint(err) {
        message.push_str(&hint);
        message.push('\n');
    }
    out.write_all(message.as_bytes())
        .await
        .map_err(|e| ScreeningError::Internal(format!("Failed to write to terminal: {e}")))
}
