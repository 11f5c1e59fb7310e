use crate::Result;
use show_network::Sequence;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use tracing::warn;

/// Reads a show script: one `id,cue_seconds,animation,...` line per sequence.
/// Lines with fewer than three fields are ignored.
pub(crate) fn parse_sequences(reader: impl BufRead) -> Result<HashMap<String, Sequence>> {
    let mut sequences = HashMap::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 3 {
            continue;
        }

        let audio_cue = match fields[1].parse::<f32>() {
            Ok(cue) if cue.is_finite() => cue,
            _ => {
                warn!("Line {}: invalid cue '{}', skipping '{}'", number + 1, fields[1], fields[0]);
                continue;
            }
        };
        let animations = fields[2..]
            .iter()
            .map(|animation| (!animation.is_empty()).then(|| animation.to_string()))
            .collect();

        sequences.insert(
            fields[0].to_string(),
            Sequence {
                id: fields[0].to_string(),
                audio_cue,
                animations,
            },
        );
    }
    Ok(sequences)
}

pub(crate) fn load_sequences(path: &Path) -> Result<HashMap<String, Sequence>> {
    let file = std::fs::File::open(path)
        .map_err(|e| format!("Cannot open sequence file {}: {e}", path.display()))?;
    parse_sequences(std::io::BufReader::new(file))
}
