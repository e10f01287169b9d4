use crate::{
    error::Error,
    pose::{Landmark, LandmarkSet},
};
use std::{io::BufRead, time::Duration};

/// Learner actions that can be interleaved with frames, e.g. `{"control": "skip"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Control {
    Pause,
    Resume,
    Skip,
    Complete,
    Restart,
}

/// One line of estimator output.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Frame {
    /// Capture time relative to the start of the stream, when the producer sent one.
    pub(crate) at: Option<Duration>,
    /// `None` when no body was detected.
    pub(crate) landmarks: Option<LandmarkSet>,
    /// Set on control lines, which carry no landmarks.
    pub(crate) control: Option<Control>,
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum RawLandmark {
    Coordinates(Vec<f32>),
    Named(Landmark),
}

#[derive(serde::Deserialize)]
struct RawFrame {
    #[serde(default)]
    t: Option<f64>,
    #[serde(default)]
    landmarks: Option<Vec<RawLandmark>>,
    #[serde(default)]
    control: Option<Control>,
}

fn landmark(raw: RawLandmark, line: usize) -> Result<Landmark, Error> {
    match raw {
        RawLandmark::Named(landmark) => Ok(landmark),
        RawLandmark::Coordinates(coords) => match coords.as_slice() {
            &[x, y, z] => Ok(Landmark::new(x, y, z)),
            &[x, y, z, visibility] => Ok(Landmark::new(x, y, z).with_visibility(visibility)),
            _ => Err(Error::LandmarkArity(line, coords.len())),
        },
    }
}

/// Parse a single JSON line; `line` is only used for error messages.
pub(crate) fn parse_frame(text: &str, line: usize) -> Result<Frame, Error> {
    let raw: RawFrame = serde_json::from_str(text).map_err(|e| Error::ParseFrame(e, line))?;
    let at = raw
        .t
        .map(|ms| {
            Duration::try_from_secs_f64(ms / 1000.0)
                .map_err(|_| Error::FrameTimestamp(line, ms))
        })
        .transpose()?;
    let landmarks = raw
        .landmarks
        .map(|landmarks| {
            landmarks
                .into_iter()
                .map(|raw| landmark(raw, line))
                .collect::<Result<Vec<_>, _>>()
                .map(LandmarkSet::from)
        })
        .transpose()?;
    Ok(Frame {
        at,
        landmarks,
        control: raw.control,
    })
}

/// Reads newline-delimited JSON frames, skipping blank lines.
pub(crate) struct FrameReader<R> {
    reader: R,
    line: usize,
    buf: String,
}

impl<R> FrameReader<R>
where
    R: BufRead,
{
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: String::new(),
        }
    }
}

impl<R> Iterator for FrameReader<R>
where
    R: BufRead,
{
    type Item = Result<Frame, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            self.line += 1;
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) if self.buf.trim().is_empty() => continue,
                Ok(_) => return Some(parse_frame(self.buf.trim(), self.line)),
                Err(e) => return Some(Err(Error::ReadFrame(e, self.line))),
            }
        }
    }
}
