//! Abtastraten-Wandlung zwischen Schmalband (Telefonie) und Breitband (Backend)
//!
//! Hochrechnen interpoliert linear zwischen Nachbarwerten, Herunterrechnen
//! mittelt ueber das jeweilige Quellfenster.
//!
//! Laengen-Invariante: `ausgabe.len() == eingabe.len() * nach / von`
//! (abgerundet). Die Wandlung ist zustandslos; Aufrufer, die einen Strom
//! stueckweise wandeln, muessen Bloecke passender Groesse liefern
//! (siehe [`block_groesse`]).

use crate::error::{AudioError, AudioResult};

/// Prueft ein Ratenpaar
pub fn raten_pruefen(von_hz: u32, nach_hz: u32) -> AudioResult<()> {
    if von_hz == 0 || nach_hz == 0 {
        return Err(AudioError::UngueltigeRate {
            von: von_hz,
            nach: nach_hz,
        });
    }
    Ok(())
}

fn ggt(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// Kleinste Anzahl Eingangswerte, die sich ohne Rest wandeln laesst
///
/// 24 kHz -> 8 kHz: 3, 8 kHz -> 24 kHz: 1.
pub fn block_groesse(von_hz: u32, nach_hz: u32) -> usize {
    if von_hz == 0 || nach_hz == 0 {
        return 1;
    }
    (von_hz as u64 / ggt(von_hz as u64, nach_hz as u64)) as usize
}

/// Wandelt `eingabe` von `von_hz` nach `nach_hz`
///
/// Leere Eingabe ergibt leere Ausgabe, gleiche Raten geben die Eingabe
/// unveraendert zurueck.
pub fn umrechnen(eingabe: &[i16], von_hz: u32, nach_hz: u32) -> Vec<i16> {
    if eingabe.is_empty() || von_hz == 0 || nach_hz == 0 {
        return Vec::new();
    }
    if von_hz == nach_hz {
        return eingabe.to_vec();
    }

    let von = von_hz as u64;
    let nach = nach_hz as u64;
    let laenge = (eingabe.len() as u64 * nach / von) as usize;

    if nach > von {
        interpolieren(eingabe, von, nach, laenge)
    } else {
        mitteln(eingabe, von, nach, laenge)
    }
}

fn interpolieren(eingabe: &[i16], von: u64, nach: u64, laenge: usize) -> Vec<i16> {
    let letzter = eingabe.len() - 1;
    (0..laenge as u64)
        .map(|i| {
            let pos = i * von;
            let k = (pos / nach) as usize;
            let rest = (pos % nach) as i64;
            let a = eingabe[k.min(letzter)] as i64;
            let b = eingabe[(k + 1).min(letzter)] as i64;
            (a + (b - a) * rest / nach as i64) as i16
        })
        .collect()
}

fn mitteln(eingabe: &[i16], von: u64, nach: u64, laenge: usize) -> Vec<i16> {
    (0..laenge as u64)
        .map(|i| {
            let start = (i * von / nach) as usize;
            let ende = (((i + 1) * von / nach) as usize).min(eingabe.len());
            if ende <= start {
                return eingabe[start.min(eingabe.len() - 1)];
            }
            let fenster = &eingabe[start..ende];
            let summe: i64 = fenster.iter().map(|&s| s as i64).sum();
            (summe / fenster.len() as i64) as i16
        })
        .collect()
}
