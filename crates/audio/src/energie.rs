//! Energie-Messung fuer die lokale Sprecherkennung
//!
//! Liefert den RMS-Wert eines PCM16-Frames, normiert auf 0.0..=1.0
//! (Division durch 32768). Die Schwelle fuer "laut" wird vom Aufrufer
//! vorgegeben.

/// Normierter RMS-Wert eines Frames
pub fn rms_normiert(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let summe: f64 = samples
        .iter()
        .map(|&s| {
            let x = s as f64 / 32768.0;
            x * x
        })
        .sum();
    (summe / samples.len() as f64).sqrt() as f32
}

/// Prueft, ob ein Frame die Energieschwelle erreicht
pub fn ist_laut(samples: &[i16], schwelle: f32) -> bool {
    rms_normiert(samples) >= schwelle
}
