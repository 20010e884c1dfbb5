use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::ops::ControlFlow;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use unique_es::{
    Descriptor, ElementCount, FieldDef, KeyComparator, RecordSink, Unique, UniqueConfig,
    UniqueImpl, cost_calc_buffer_size, use_cost,
};

#[derive(Parser, Debug)]
#[command(name = "unique_keys", version, about = "Deduplicate newline-delimited keys")]
struct Args {
    /// Input file; stdin when omitted.
    #[arg(long)]
    input: Option<PathBuf>,

    #[arg(long = "memory-bytes", default_value_t = 16 * 1024 * 1024)]
    memory_bytes: usize,

    /// Only print keys seen at least this many times (0 = every distinct key)
    #[arg(long = "min-dupl", default_value_t = 0)]
    min_dupl: u64,

    /// Stream keys out during the merge instead of collecting them first.
    #[arg(long)]
    walk: bool,

    /// Print the occurrence count before each key.
    #[arg(long)]
    counts: bool,

    /// Treat every line as a fixed-width key, space padded or cut to N bytes.
    #[arg(long = "fixed-width")]
    fixed_width: Option<usize>,

    /// Longest line kept in variable-width mode; longer lines are cut.
    #[arg(long = "max-len", default_value_t = 1024)]
    max_len: usize,

    /// Directory for the spill file.
    #[arg(long = "tmp-dir")]
    tmp_dir: Option<PathBuf>,

    /// Print the cost estimate for the input and exit.
    #[arg(long)]
    estimate: bool,

    /// Comparison cost factor used by --estimate.
    #[arg(long = "compare-factor", default_value_t = 5.0)]
    compare_factor: f64,
}

// Writes keys as text lines, stripping the descriptor framing.
struct LineSink<'a, W: Write> {
    out: W,
    descriptor: &'a Descriptor,
    counts: bool,
}

impl<W: Write> LineSink<'_, W> {
    fn write_key(&mut self, key: &[u8], count: ElementCount) -> io::Result<()> {
        if self.counts {
            write!(self.out, "{}\t", count)?;
        }
        for (i, value) in self.descriptor.unpack_key(key).into_iter().enumerate() {
            if i > 0 {
                self.out.write_all(b"\t")?;
            }
            let value = value.unwrap_or(b"NULL");
            let value = match self.descriptor {
                Descriptor::Fixed(_) => value.trim_ascii_end(),
                Descriptor::Variable(_) => value,
            };
            self.out.write_all(value)?;
        }
        self.out.write_all(b"\n")
    }
}

impl<W: Write> RecordSink for LineSink<'_, W> {
    fn write_record(&mut self, key: &[u8], count: ElementCount) -> io::Result<()> {
        self.write_key(key, count)
    }
}

fn read_lines(args: &Args) -> io::Result<Box<dyn BufRead>> {
    Ok(match &args.input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin())),
    })
}

fn estimate(args: &Args) -> Result<(), String> {
    let key_size = args.fixed_width.unwrap_or(args.max_len);
    let n_keys = read_lines(args)
        .map_err(|e| format!("Failed to open input: {}", e))?
        .split(b'\n')
        .count();
    let mut buffer = Vec::with_capacity(cost_calc_buffer_size(n_keys, key_size, args.memory_bytes) / 4);
    let estimate = use_cost(
        &mut buffer,
        n_keys,
        key_size,
        args.memory_bytes,
        args.compare_factor,
        args.min_dupl > 0,
    );
    println!("Keys: {}, Key size: {} bytes, {}", n_keys, key_size, estimate);
    Ok(())
}

fn run(args: &Args) -> Result<(), String> {
    let (descriptor, key_size) = match args.fixed_width {
        Some(width) => (Descriptor::fixed(width), width),
        None => {
            let mut descriptor = Descriptor::variable(0);
            descriptor
                .setup_for_field(&FieldDef::variable(0, args.max_len))
                .map_err(|e| e.to_string())?;
            let key_size = descriptor.key_length();
            (descriptor, key_size)
        }
    };
    let comparator = match descriptor {
        Descriptor::Fixed(_) => KeyComparator::Bytes,
        Descriptor::Variable(_) => KeyComparator::DescriptorSingleArg,
    };

    let mut config = UniqueConfig::default()
        .with_max_in_memory_size(args.memory_bytes)
        .with_min_dupl_count(args.min_dupl);
    if let Some(dir) = &args.tmp_dir {
        config = config.with_tmp_dir(dir);
    }
    let mut unique = UniqueImpl::with_config(comparator, key_size, descriptor, config);

    let input = read_lines(args).map_err(|e| format!("Failed to open input: {}", e))?;
    let mut fixed_key = vec![b' '; args.fixed_width.unwrap_or(0)];
    for line in input.split(b'\n') {
        let mut line = line.map_err(|e| format!("Failed to read input: {}", e))?;
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        match args.fixed_width {
            Some(width) => {
                let take = line.len().min(width);
                fixed_key.fill(b' ');
                fixed_key[..take].copy_from_slice(&line[..take]);
                unique.add(&fixed_key).map_err(|e| e.to_string())?;
            }
            None => {
                let row = vec![Some(line)];
                unique
                    .add_packed_record(&row, false)
                    .map_err(|e| e.to_string())?;
            }
        }
    }
    unique.close_for_expansion();

    let descriptor = unique.descriptor().clone();
    let stdout = io::stdout();
    let mut sink = LineSink {
        out: BufWriter::new(stdout.lock()),
        descriptor: &descriptor,
        counts: args.counts,
    };
    if args.walk {
        let mut failure = None;
        let walked = unique.walk(&mut |key, count| match sink.write_key(key, count) {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                failure = Some(e);
                ControlFlow::Break(())
            }
        });
        if let Some(e) = failure {
            return Err(format!("Failed to write output: {}", e));
        }
        walked.map_err(|e| e.to_string())?;
    } else {
        unique.get(&mut sink).map_err(|e| e.to_string())?;
    }
    sink.out
        .flush()
        .map_err(|e| format!("Failed to write output: {}", e))?;

    eprintln!("{}", unique.stats());
    Ok(())
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();

    let args = Args::parse();
    let result = if args.estimate {
        estimate(&args)
    } else {
        run(&args)
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
