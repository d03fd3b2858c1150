use std::path::PathBuf;
use std::thread;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, ValueEnum};
use mrtd_reader::dg11::PersonalDetails;
use mrtd_reader::secure_messaging::SecureMessagingProfile;
use mrtd_reader::{MrzIdentity, PassportReader, ReaderConfig, SessionEvent};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;


#[derive(Clone, Debug, Eq, Hash, Ord, Parser, PartialEq, PartialOrd)]
enum Mode {
    ListReaders,
    Read(ReadOpts),
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, ValueEnum)]
enum Profile {
    /// Zero IV, separate counter values for command and response
    #[default]
    Icao,

    /// Encrypted-counter IV, one counter value per command/response pair
    Counter,
}
impl From<Profile> for SecureMessagingProfile {
    fn from(value: Profile) -> Self {
        match value {
            Profile::Icao => SecureMessagingProfile::ICAO_9303,
            Profile::Counter => SecureMessagingProfile::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, Parser, PartialEq, PartialOrd)]
struct ReadOpts {
    #[arg(short, long = "reader", default_value = "0")]
    pub reader_index: usize,

    /// File containing the full machine-readable zone
    #[arg(short, long = "mrz", conflicts_with_all = ["document_number", "birth_date", "expiry_date"])]
    pub mrz_path: Option<PathBuf>,

    #[arg(short, long, requires_all = ["birth_date", "expiry_date"])]
    pub document_number: Option<String>,

    /// Date of birth as YYMMDD
    #[arg(short, long)]
    pub birth_date: Option<String>,

    /// Date of expiry as YYMMDD
    #[arg(short, long)]
    pub expiry_date: Option<String>,

    /// Where to store the facial image
    #[arg(short, long = "face")]
    pub face_path: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t)]
    pub profile: Profile,

    #[arg(long, default_value = "223")]
    pub chunk_size: u8,

    /// Continue if a data group is missing
    #[arg(long)]
    pub skip_missing: bool,
}
impl ReadOpts {
    fn identity(&self) -> anyhow::Result<MrzIdentity> {
        if let Some(path) = &self.mrz_path {
            let mrz_string = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read MRZ from {}", path.display()))?;
            return mrz_string.parse::<MrzIdentity>().context("failed to parse MRZ");
        }
        match (&self.document_number, &self.birth_date, &self.expiry_date) {
            (Some(number), Some(birth), Some(expiry)) => MrzIdentity::from_fields(number, birth, expiry)
                .context("invalid document data"),
            _ => bail!("either --mrz or --document-number, --birth-date and --expiry-date are required"),
        }
    }

    fn config(&self) -> ReaderConfig {
        ReaderConfig::new()
            .with_max_read_length(self.chunk_size)
            .with_secure_messaging(self.profile.into())
            .with_skip_missing_files(self.skip_missing)
    }
}


fn print_details(details: &PersonalDetails) {
    println!("Personal details:");
    if let Some(name) = details.full_name() {
        println!("  name: {}", name);
    }
    for (field, value) in details.fields() {
        println!("  {}: {}", field, value);
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mode = Mode::parse();

    let ctx = pcsc::Context::establish(pcsc::Scope::User)
        .context("failed to establish PC/SC user context")?;
    let readers_buf_len = ctx.list_readers_len()
        .context("failed to obtain length of buffer for PC/SC reader list")?;
    let mut readers_buf = vec![0u8; readers_buf_len];
    let mut readers = ctx.list_readers(&mut readers_buf)
        .context("failed to list PC/SC readers")?;

    let opts = match mode {
        Mode::ListReaders => {
            for (i, reader) in readers.enumerate() {
                println!("{}: {:?}", i, reader);
            }
            return Ok(());
        },
        Mode::Read(opts) => opts,
    };

    // validate before touching the chip
    let identity = opts.identity()?;

    let reader = readers.nth(opts.reader_index)
        .ok_or_else(|| anyhow!("no reader at index {}", opts.reader_index))?;
    let card = ctx.connect(reader, pcsc::ShareMode::Shared, pcsc::Protocols::ANY)
        .context("failed to connect to card")?;
    info!(?reader, "connected");

    let (sender, receiver) = crossbeam_channel::unbounded();
    let printer = thread::spawn(move || {
        for event in receiver {
            match event {
                SessionEvent::Ready => eprintln!("chip ready"),
                SessionEvent::Progress(fraction) => eprintln!("{:3.0}%", fraction * 100.0),
                SessionEvent::Failed(kind) => eprintln!("failed: {}", kind),
                SessionEvent::Completed(_) => eprintln!("done"),
            }
        }
    });

    let passport_reader = PassportReader::new(opts.config()).with_events(sender);
    let result = passport_reader.run(card, &identity, &mut rand::thread_rng());
    // the sender goes away with the reader, ending the printer
    drop(passport_reader);
    let _ = printer.join();
    let result = result.context("failed to read the document")?;

    if let Some(face) = &result.facial_image {
        println!(
            "Facial image: {}, {}x{}, {} bytes",
            face.format, face.width, face.height, face.image_data.len(),
        );
        if let Some(path) = &opts.face_path {
            std::fs::write(path, &face.image_data)
                .with_context(|| format!("failed to write facial image to {}", path.display()))?;
            debug!(path = %path.display(), extension = face.format.extension(), "facial image written");
        }
    }
    if let Some(details) = &result.personal_details {
        print_details(details);
    }
    Ok(())
}
