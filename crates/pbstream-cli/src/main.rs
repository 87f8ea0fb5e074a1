//! pbstream - Inspect, split and partition protobuf record streams
//!
//! Records are length-prefixed protobuf messages described by a serialized
//! `FileDescriptorSet` (as written by `protoc --descriptor_set_out
//! --include_imports`).

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pbstream_core::codec::StatsVisitor;
use pbstream_core::flat::flatten;
use pbstream_core::stream::{LengthPrefix, RecordCursor, RecordReader, RecordWriter, StreamConfig};
use pbstream_core::{MessageCodec, MessageReader, Value};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;

/// Inspect, split and partition length-prefixed protobuf record streams
#[derive(Parser, Debug)]
#[command(name = "pbstream")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print records as flattened path=value lines
    Cat {
        #[command(flatten)]
        schema: SchemaArgs,

        #[command(flatten)]
        range: RangeArgs,

        /// Report undecodable records and continue instead of stopping
        #[arg(long)]
        keep_going: bool,

        /// Record stream to read ("-" or absent for stdin)
        input: Option<PathBuf>,
    },

    /// Split a stream into files of a fixed number of records
    Split {
        #[command(flatten)]
        schema: SchemaArgs,

        #[command(flatten)]
        range: RangeArgs,

        /// Records per output file
        #[arg(short = 'z', long, default_value = "1000")]
        size: u64,

        /// Output file name; "{}" is replaced by the zero-padded part number
        #[arg(short, long)]
        template: Option<String>,

        /// Record stream to read ("-" or absent for stdin)
        input: Option<PathBuf>,
    },

    /// Partition records into files by the value at a key path
    Part {
        #[command(flatten)]
        schema: SchemaArgs,

        /// Dotted path of the partition key, e.g. "customer.id"
        #[arg(short, long)]
        key: String,

        /// Output file name; "{}" is replaced by the key value
        #[arg(short, long)]
        template: Option<String>,

        /// Record stream to read ("-" or absent for stdin)
        input: Option<PathBuf>,
    },

    /// Print "key<TAB>offset" for every record, for building an index
    Keys {
        #[command(flatten)]
        schema: SchemaArgs,

        /// Dotted path of the key
        #[arg(short, long)]
        key: String,

        /// Record stream to read ("-" or absent for stdin)
        input: Option<PathBuf>,
    },

    /// Print the single record starting at a byte offset
    Get {
        #[command(flatten)]
        schema: SchemaArgs,

        /// Byte offset of the record's length prefix
        #[arg(short, long)]
        offset: u64,

        /// Record stream file
        input: PathBuf,
    },

    /// Print record, message and field counts
    Stats {
        #[command(flatten)]
        schema: SchemaArgs,

        /// Record stream to read ("-" or absent for stdin)
        input: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Serialized FileDescriptorSet describing the records
    #[arg(short = 'p', long)]
    schema: PathBuf,

    /// Fully-qualified message type of each record
    #[arg(short, long)]
    message: String,

    /// Length prefix format of the stream
    #[arg(long, value_enum, default_value = "varint")]
    prefix: PrefixFormat,
}

#[derive(Args, Debug)]
struct RangeArgs {
    /// Skip this many records first
    #[arg(short, long, default_value = "0")]
    skip: u64,

    /// Stop after this many records
    #[arg(short, long)]
    count: Option<u64>,
}

/// Length prefix formats
#[derive(Debug, Clone, Copy, ValueEnum)]
enum PrefixFormat {
    /// Base-128 varint
    Varint,
    /// Four bytes, little-endian
    Fixed32,
}

impl From<PrefixFormat> for LengthPrefix {
    fn from(format: PrefixFormat) -> Self {
        match format {
            PrefixFormat::Varint => LengthPrefix::Varint,
            PrefixFormat::Fixed32 => LengthPrefix::Fixed32Le,
        }
    }
}

impl SchemaArgs {
    fn codec(&self) -> Result<MessageCodec> {
        let blob = fs::read(&self.schema)
            .with_context(|| format!("Failed to read schema: {}", self.schema.display()))?;
        let codec = MessageCodec::from_descriptor_set(&blob, &self.message).with_context(|| {
            format!(
                "Failed to load message type '{}' from {}",
                self.message,
                self.schema.display()
            )
        })?;
        debug!(
            "Loaded {} with {} message type(s)",
            self.message,
            codec.registry().messages().len()
        );
        Ok(codec)
    }

    fn config(&self) -> StreamConfig {
        StreamConfig::new().length_prefix(self.prefix.into())
    }
}

impl RangeArgs {
    fn all() -> Self {
        Self { skip: 0, count: None }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    run(&cli.command, &mut out)?;
    out.flush().context("Failed to write output")?;
    Ok(())
}

/// Dispatch a subcommand, writing its report to `out`
fn run(command: &Command, out: &mut dyn Write) -> Result<()> {
    match command {
        Command::Cat {
            schema,
            range,
            keep_going,
            input,
        } => cat(schema, range, *keep_going, input.as_deref(), out),
        Command::Split {
            schema,
            range,
            size,
            template,
            input,
        } => split(schema, range, *size, template.as_deref(), input.as_deref()),
        Command::Part {
            schema,
            key,
            template,
            input,
        } => part(schema, key, template.as_deref(), input.as_deref()),
        Command::Keys { schema, key, input } => keys(schema, key, input.as_deref(), out),
        Command::Get {
            schema,
            offset,
            input,
        } => get(schema, *offset, input, out),
        Command::Stats { schema, input } => stats(schema, input.as_deref(), out),
    }
}

/// Open the input stream, treating a missing path or "-" as stdin
fn open_input(path: Option<&Path>) -> Result<Box<dyn Read>> {
    match path {
        None => Ok(Box::new(io::stdin())),
        Some(p) if p == Path::new("-") => Ok(Box::new(io::stdin())),
        Some(p) => {
            let file =
                File::open(p).with_context(|| format!("Failed to open input: {}", p.display()))?;
            Ok(Box::new(file))
        }
    }
}

/// Read records in order, passing each selected one to `handle`.
///
/// With `keep_going`, records that fail to decode are reported and skipped;
/// framing errors always stop the walk.
fn for_each_record<F>(
    reader: &mut RecordReader<Box<dyn Read>>,
    codec: &MessageCodec,
    range: &RangeArgs,
    keep_going: bool,
    mut handle: F,
) -> Result<u64>
where
    F: FnMut(&RecordCursor, Value) -> Result<()>,
{
    let mut handled = 0;

    loop {
        if range.count.is_some_and(|count| handled >= count) {
            break;
        }

        let offset = RecordReader::position(reader);
        let raw = reader
            .read_raw()
            .with_context(|| format!("Failed to read record at offset {}", offset))?;
        let Some(raw) = raw else {
            break;
        };
        let Some(cursor) = reader.cursor().cloned() else {
            break;
        };

        if cursor.number < range.skip {
            trace!("Skipping record {}", cursor.number);
            continue;
        }

        let value = match codec.decode(&raw) {
            Ok(value) => value,
            Err(e) if keep_going => {
                warn!(
                    "Skipping record {} at offset {}: {}",
                    cursor.number, cursor.offset, e
                );
                continue;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!(
                        "Failed to decode record {} at offset {}",
                        cursor.number, cursor.offset
                    )
                })
            }
        };

        handle(&cursor, value)?;
        handled += 1;
    }

    Ok(handled)
}

/// Write one record as path=value lines followed by a blank line
fn write_flat(out: &mut dyn Write, cursor: &RecordCursor, value: &Value) -> Result<()> {
    writeln!(out, "_NUMBER={}", cursor.number)?;
    writeln!(out, "_OFFSET={}", cursor.offset)?;
    writeln!(out, "_LENGTH={}", cursor.length)?;
    for (path, leaf) in flatten(value) {
        writeln!(out, "{}={}", path, leaf)?;
    }
    writeln!(out)?;
    Ok(())
}

fn cat(
    schema: &SchemaArgs,
    range: &RangeArgs,
    keep_going: bool,
    input: Option<&Path>,
    out: &mut dyn Write,
) -> Result<()> {
    let codec = schema.codec()?;
    let mut reader = RecordReader::with_config(open_input(input)?, schema.config());

    let printed = for_each_record(&mut reader, &codec, range, keep_going, |cursor, value| {
        write_flat(out, cursor, &value)
    })?;

    info!("Printed {} record(s)", printed);
    Ok(())
}

/// Substitute `part` for the "{}" placeholder of an output template
fn expand_template(template: &str, part: &str) -> Result<PathBuf> {
    if !template.contains("{}") {
        bail!("Output template must contain \"{{}}\": {}", template);
    }
    Ok(PathBuf::from(template.replacen("{}", part, 1)))
}

/// The template used when none is given: the input name plus a suffix
fn default_template(input: Option<&Path>) -> Result<String> {
    match input {
        Some(p) if p != Path::new("-") => Ok(format!("{}.{{}}", p.display())),
        _ => bail!("--template is required when reading from stdin"),
    }
}

fn create_output(path: &Path, config: &StreamConfig) -> Result<RecordWriter<BufWriter<File>>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    Ok(RecordWriter::with_config(BufWriter::new(file), config.clone()))
}

fn split(
    schema: &SchemaArgs,
    range: &RangeArgs,
    size: u64,
    template: Option<&str>,
    input: Option<&Path>,
) -> Result<()> {
    if size == 0 {
        bail!("--size must be at least 1");
    }
    let template = match template {
        Some(t) => t.to_string(),
        None => default_template(input)?,
    };

    let codec = schema.codec()?;
    let config = schema.config();
    let mut reader = RecordReader::with_config(open_input(input)?, config.clone());

    let mut current: Option<RecordWriter<BufWriter<File>>> = None;
    let mut part_number = 0u64;

    for_each_record(&mut reader, &codec, range, false, |cursor, _value| {
        let mut writer = match current.take() {
            Some(writer) => writer,
            None => {
                let path = expand_template(&template, &format!("{:05}", part_number))?;
                info!("Writing {}", path.display());
                create_output(&path, &config)?
            }
        };

        writer.write_raw(&cursor.raw)?;

        if writer.records_written() >= size {
            writer.flush()?;
            part_number += 1;
        } else {
            current = Some(writer);
        }
        Ok(())
    })?;

    if let Some(mut writer) = current {
        writer.flush()?;
    }
    Ok(())
}

/// Turn a key value into something safe to put in a file name
fn partition_name(key: Option<&Value>) -> String {
    let name = key.map(Value::to_string).unwrap_or_default();
    if name.is_empty() {
        return "_".to_string();
    }
    name.replace(['/', '\\'], "_")
}

fn part(
    schema: &SchemaArgs,
    key: &str,
    template: Option<&str>,
    input: Option<&Path>,
) -> Result<()> {
    let template = match template {
        Some(t) => t.to_string(),
        None => default_template(input)?,
    };

    let codec = schema.codec()?;
    let config = schema.config();
    let mut reader = RecordReader::with_config(open_input(input)?, config.clone());
    let mut writers: HashMap<String, RecordWriter<BufWriter<File>>> = HashMap::new();

    for_each_record(&mut reader, &codec, &RangeArgs::all(), false, |cursor, value| {
        let name = partition_name(value.get_path(key));
        let writer = match writers.entry(name) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = expand_template(&template, entry.key())?;
                debug!("New partition {} -> {}", entry.key(), path.display());
                entry.insert(create_output(&path, &config)?)
            }
        };
        writer.write_raw(&cursor.raw)?;
        Ok(())
    })?;

    info!("Wrote {} partition(s)", writers.len());
    for writer in writers.values_mut() {
        writer.flush()?;
    }
    Ok(())
}

fn keys(schema: &SchemaArgs, key: &str, input: Option<&Path>, out: &mut dyn Write) -> Result<()> {
    let codec = schema.codec()?;
    let mut reader = RecordReader::with_config(open_input(input)?, schema.config());

    for_each_record(&mut reader, &codec, &RangeArgs::all(), false, |cursor, value| {
        let found = value.get_path(key).map(Value::to_string).unwrap_or_default();
        writeln!(out, "{}\t{}", found, cursor.offset)?;
        Ok(())
    })?;
    Ok(())
}

fn get(schema: &SchemaArgs, offset: u64, input: &Path, out: &mut dyn Write) -> Result<()> {
    let codec = schema.codec()?;
    let file =
        File::open(input).with_context(|| format!("Failed to open input: {}", input.display()))?;
    let mut reader = MessageReader::with_config(file, codec, schema.config());

    let value = reader
        .read_at(offset)
        .with_context(|| format!("Failed to read record at offset {}", offset))?;
    let (Some(value), Some(cursor)) = (value, reader.cursor()) else {
        bail!("No record at offset {}", offset);
    };
    write_flat(out, cursor, &value)
}

fn stats(schema: &SchemaArgs, input: Option<&Path>, out: &mut dyn Write) -> Result<()> {
    let codec = schema.codec()?;
    let mut reader = RecordReader::with_config(open_input(input)?, schema.config());
    let mut totals = StatsVisitor::default();
    let mut records = 0u64;
    let mut payload_bytes = 0u64;

    for cursor in &mut reader {
        let cursor = cursor.context("Failed to read record stream")?;
        codec.walk(&cursor.raw, &mut totals).with_context(|| {
            format!(
                "Failed to decode record {} at offset {}",
                cursor.number, cursor.offset
            )
        })?;
        records += 1;
        payload_bytes += cursor.length as u64;
    }

    writeln!(out, "records\t{}", records)?;
    writeln!(out, "payload_bytes\t{}", payload_bytes)?;
    writeln!(out, "messages\t{}", totals.message_count)?;
    writeln!(out, "fields\t{}", totals.field_count)?;
    writeln!(out, "string_bytes\t{}", totals.byte_count)?;
    writeln!(out, "max_depth\t{}", totals.max_depth)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbstream_core::schema::bootstrap::{descriptor_registry, encode_descriptor_set};
    use pbstream_core::schema::{FieldDefinition, FieldKind, FileDefinition, MessageDefinition};
    use pbstream_core::MessageWriter;
    use tempfile::TempDir;

    const MESSAGE: &str = "shop.Order";

    /// Writes a descriptor set and a three-record stream into `dir`
    fn fixture(dir: &Path) -> (PathBuf, PathBuf) {
        let file = FileDefinition::new("shop.proto", "shop").message(
            MessageDefinition::new("Order")
                .field(FieldDefinition::new("id", 1, FieldKind::UInt64))
                .field(FieldDefinition::new("region", 2, FieldKind::String))
                .field(FieldDefinition::new("items", 3, FieldKind::String).repeated()),
        );
        let bootstrap = descriptor_registry().unwrap();
        let schema = dir.join("shop.pb");
        fs::write(&schema, encode_descriptor_set(&[file], &bootstrap).unwrap()).unwrap();

        let blob = fs::read(&schema).unwrap();
        let codec = MessageCodec::from_descriptor_set(&blob, MESSAGE).unwrap();
        let mut writer = MessageWriter::new(Vec::new(), codec);
        let records = [
            (1u64, "eu", vec!["a", "b"]),
            (2, "us", vec![]),
            (3, "eu", vec!["c"]),
        ];
        for (id, region, items) in records {
            let items = Value::List(items.into_iter().map(Value::from).collect());
            writer
                .write(&Value::message([
                    ("id", Value::UInt(id)),
                    ("region", Value::from(region)),
                    ("items", items),
                ]))
                .unwrap();
        }
        let stream = dir.join("orders.pbs");
        fs::write(&stream, writer.into_inner().into_inner()).unwrap();

        (schema, stream)
    }

    fn schema_args(schema: &Path) -> SchemaArgs {
        SchemaArgs {
            schema: schema.to_path_buf(),
            message: MESSAGE.to_string(),
            prefix: PrefixFormat::Varint,
        }
    }

    fn run_to_string(command: &Command) -> String {
        let mut out = Vec::new();
        run(command, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_cat() {
        let dir = TempDir::new().unwrap();
        let (schema, stream) = fixture(dir.path());

        let output = run_to_string(&Command::Cat {
            schema: schema_args(&schema),
            range: RangeArgs {
                skip: 1,
                count: Some(1),
            },
            keep_going: false,
            input: Some(stream),
        });

        assert_eq!(
            output,
            "_NUMBER=1\n_OFFSET=13\n_LENGTH=6\nid=2\nregion=us\n\n"
        );
    }

    #[test]
    fn test_keys_and_get() {
        let dir = TempDir::new().unwrap();
        let (schema, stream) = fixture(dir.path());

        let output = run_to_string(&Command::Keys {
            schema: schema_args(&schema),
            key: "region".to_string(),
            input: Some(stream.clone()),
        });
        assert_eq!(output, "eu\t0\nus\t13\neu\t20\n");

        let output = run_to_string(&Command::Get {
            schema: schema_args(&schema),
            offset: 20,
            input: stream,
        });
        assert!(output.starts_with("_NUMBER=0\n_OFFSET=20\n"));
        assert!(output.contains("items.0=c\n"));
    }

    #[test]
    fn test_split() {
        let dir = TempDir::new().unwrap();
        let (schema, stream) = fixture(dir.path());
        let template = dir.path().join("out/part-{}.pbs");

        run_to_string(&Command::Split {
            schema: schema_args(&schema),
            range: RangeArgs::all(),
            size: 2,
            template: Some(template.display().to_string()),
            input: Some(stream.clone()),
        });

        let first = fs::read(dir.path().join("out/part-00000.pbs")).unwrap();
        let second = fs::read(dir.path().join("out/part-00001.pbs")).unwrap();
        let original = fs::read(&stream).unwrap();
        assert_eq!(first, original[..20].to_vec());
        assert_eq!(second, original[20..].to_vec());
    }

    #[test]
    fn test_part() {
        let dir = TempDir::new().unwrap();
        let (schema, stream) = fixture(dir.path());

        run_to_string(&Command::Part {
            schema: schema_args(&schema),
            key: "region".to_string(),
            template: None,
            input: Some(stream.clone()),
        });

        let eu = fs::File::open(format!("{}.eu", stream.display())).unwrap();
        let offsets: Vec<u64> = RecordReader::new(eu)
            .map(|cursor| cursor.unwrap().offset)
            .collect();
        assert_eq!(offsets, vec![0, 13]);
        assert!(Path::new(&format!("{}.us", stream.display())).exists());
    }

    #[test]
    fn test_stats() {
        let dir = TempDir::new().unwrap();
        let (schema, stream) = fixture(dir.path());

        let output = run_to_string(&Command::Stats {
            schema: schema_args(&schema),
            input: Some(stream),
        });
        assert!(output.contains("records\t3\n"));
        assert!(output.contains("fields\t9\n"));
        assert!(output.contains("max_depth\t1\n"));
    }

    #[test]
    fn test_unknown_message() {
        let dir = TempDir::new().unwrap();
        let (schema, stream) = fixture(dir.path());
        let mut args = schema_args(&schema);
        args.message = "shop.Missing".to_string();

        let command = Command::Cat {
            schema: args,
            range: RangeArgs::all(),
            keep_going: false,
            input: Some(stream),
        };
        let err = run(&command, &mut Vec::new()).unwrap_err();
        assert!(err.to_string().contains("shop.Missing"));
    }

    #[test]
    fn test_templates() {
        assert_eq!(
            expand_template("out.{}.pbs", "00003").unwrap(),
            PathBuf::from("out.00003.pbs")
        );
        assert!(expand_template("out.pbs", "1").is_err());
        assert_eq!(
            default_template(Some(Path::new("data.pbs"))).unwrap(),
            "data.pbs.{}"
        );
        assert!(default_template(None).is_err());
    }

    #[test]
    fn test_partition_name() {
        assert_eq!(partition_name(Some(&Value::from("a/b"))), "a_b");
        assert_eq!(partition_name(Some(&Value::UInt(7))), "7");
        assert_eq!(partition_name(None), "_");
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
