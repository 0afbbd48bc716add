use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, BufRead, BufReader},
    path::Path,
};

/// Conteo palabra → apariciones, ordenado por palabra.
pub type WordCounts = BTreeMap<String, u64>;

/// Limpia un token: sólo alfanumérico y '_', en minúscula.
fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_lowercase()
}

pub fn count_words<R: BufRead>(reader: R) -> io::Result<WordCounts> {
    let mut counts = WordCounts::new();

    for line in reader.lines() {
        let line = line?;
        for raw in line.split_whitespace() {
            let cleaned = normalize(raw);
            if !cleaned.is_empty() {
                *counts.entry(cleaned).or_insert(0) += 1;
            }
        }
    }

    Ok(counts)
}

/// Lee un archivo de texto y cuenta sus palabras.
pub fn count_file(input_path: &str) -> io::Result<WordCounts> {
    let file = File::open(input_path)?;
    count_words(BufReader::new(file))
}

/// Serializa el conteo como CSV sin cabecera: "palabra,conteo".
pub fn render_counts(counts: &WordCounts) -> Result<String, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    for (word, count) in counts {
        writer.serialize((word, count))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Parsea un resultado "palabra,conteo". Palabras repetidas se suman.
pub fn parse_counts(data: &str) -> Result<WordCounts, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(data.as_bytes());

    let mut counts = WordCounts::new();
    for row in reader.deserialize::<(String, u64)>() {
        let (word, count) = row?;
        *counts.entry(word).or_insert(0) += count;
    }

    Ok(counts)
}

pub fn merge_counts(into: &mut WordCounts, other: &WordCounts) {
    for (word, count) in other {
        *into.entry(word.clone()).or_insert(0) += count;
    }
}

/// Escribe el conteo en disco creando la carpeta de salida si hace falta.
pub fn write_counts_file(output_path: &Path, counts: &WordCounts) -> Result<(), csv::Error> {
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(output_path)?;

    for (word, count) in counts {
        writer.serialize((word, count))?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Caso feliz: texto normal, mayúsculas, signos, etc.
    #[test]
    fn count_file_counts_words_correctly() {
        let tmp = tempfile::tempdir().unwrap();
        let input_path = tmp.path().join("input.txt");

        let mut f = fs::File::create(&input_path).unwrap();
        writeln!(f, "Hola hola, mundo!!").unwrap();
        writeln!(f, "mundo   mundo_prueba").unwrap();

        let counts = count_file(input_path.to_str().unwrap()).unwrap();

        let expected: WordCounts = [("hola", 2), ("mundo", 2), ("mundo_prueba", 1)]
            .into_iter()
            .map(|(w, c)| (w.to_string(), c))
            .collect();
        assert_eq!(counts, expected);
    }

    #[test]
    fn count_file_returns_error_when_input_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let input_path = tmp.path().join("no_existe.txt");

        assert!(count_file(input_path.to_str().unwrap()).is_err());
    }

    #[test]
    fn rendered_counts_parse_back_into_the_same_map() {
        let counts = count_words("b a a c".as_bytes()).unwrap();

        let csv_text = render_counts(&counts).unwrap();
        assert_eq!(csv_text, "a,2\nb,1\nc,1\n");

        assert_eq!(parse_counts(&csv_text).unwrap(), counts);
    }

    #[test]
    fn parse_counts_sums_repeated_words_and_rejects_garbage() {
        let counts = parse_counts("x,1\ny,2\nx,4\n").unwrap();
        assert_eq!(counts.get("x"), Some(&5));
        assert_eq!(counts.get("y"), Some(&2));

        assert!(parse_counts("x,no-es-numero\n").is_err());
    }

    #[test]
    fn merge_counts_adds_partials() {
        let mut total = parse_counts("a,1\nb,2\n").unwrap();
        merge_counts(&mut total, &parse_counts("b,3\nc,1\n").unwrap());

        assert_eq!(render_counts(&total).unwrap(), "a,1\nb,5\nc,1\n");
    }

    /// Debe crear directorios intermedios para el output si no existen.
    #[test]
    fn write_counts_file_creates_parent_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let nested_dir = tmp.path().join("subdir1").join("subdir2");
        let output_path = nested_dir.join("out.csv");

        let counts = count_words("test test".as_bytes()).unwrap();
        write_counts_file(&output_path, &counts).unwrap();

        assert!(nested_dir.exists());
        let content = fs::read_to_string(&output_path).unwrap();
        assert_eq!(content.trim(), "test,2");
    }
}
