use std::path::{Path, PathBuf};

use kto_common::LaunchError;

pub const SETUP_SCRIPT_NAME: &str = "setup_experiment.sh";
pub const REMOTE_SETUP_PATH: &str = "/home/ubuntu/setup_experiment.sh";
pub const REMOTE_ARCHIVE_PATH: &str = "/home/ubuntu/code.tar.gz";
pub const REMOTE_OUTPUT_LOG: &str = "/home/ubuntu/experiment-output.log";
pub const SCREEN_SESSION: &str = "experiment";

/// Render the setup script executed on the instance over SSH, with the
/// experiment name baked in. The config reference arrives as `$1` at
/// execution time.
///
/// Every step carries a guard so a partially failed run can simply be
/// re-executed: no duplicate installs, no duplicate symlinks, no second
/// screen session.
pub fn render_setup_script(experiment_name: &str) -> String {
    SETUP_TEMPLATE.replace("__EXPERIMENT__", experiment_name)
}

/// Write the rendered script into `dir` so it can be scp'd alongside the
/// code archive.
pub fn write_setup_script(dir: &Path, experiment_name: &str) -> Result<PathBuf, LaunchError> {
    let path = dir.join(SETUP_SCRIPT_NAME);
    std::fs::write(&path, render_setup_script(experiment_name))?;
    Ok(path)
}

const SETUP_TEMPLATE: &str = r#"#!/bin/bash
# Prepares a freshly launched GPU instance and starts the experiment in a
# detached screen session. Safe to re-run after a partial failure: every
# step is guarded by a precondition check. pipefail keeps a failed pip
# install fatal even though its output is piped through tee.
set -e
set -o pipefail

CONFIG_REF="${1:?usage: setup_experiment.sh <config-ref>}"
EXPERIMENT_NAME="__EXPERIMENT__"

cd /home/ubuntu

echo "=== Starting setup for ${EXPERIMENT_NAME} at $(date) ==="

# Unpack the code archive (ships the .env secrets file inside).
if [ ! -d manipulation_hackathon ]; then
    if [ ! -f /home/ubuntu/code.tar.gz ]; then
        echo "ERROR: /home/ubuntu/code.tar.gz not found; upload it first"
        exit 1
    fi
    echo "Extracting code..."
    tar -xzf code.tar.gz
    rm code.tar.gz
fi
cd manipulation_hackathon

if [ ! -f .env ]; then
    echo "ERROR: .env file not found in archive"
    exit 1
fi

# The training code expects the secrets file inside its package directory.
if [ ! -e targeted_llm_manipulation/.env ]; then
    ln -sf ../.env targeted_llm_manipulation/.env
    echo "Created symlink: targeted_llm_manipulation/.env -> ../.env"
fi

# Flatten the per-category config directories onto the flat names the
# runner resolves config paths against, skipping links that already exist.
for category_dir in targeted_llm_manipulation/config/env_configs/*/; do
    [ -d "$category_dir" ] || continue
    link_name=$(basename "$category_dir")
    if [ ! -e "$link_name" ]; then
        ln -s "$category_dir" "$link_name"
    fi
done

# Install Miniconda only when conda is absent.
if ! command -v conda &> /dev/null; then
    if [ ! -d /home/ubuntu/miniconda ]; then
        echo "Installing Miniconda..."
        wget -q https://repo.anaconda.com/miniconda/Miniconda3-latest-Linux-x86_64.sh -O /home/ubuntu/miniconda.sh
        bash /home/ubuntu/miniconda.sh -b -p /home/ubuntu/miniconda
        rm /home/ubuntu/miniconda.sh
        /home/ubuntu/miniconda/bin/conda init bash
    fi
    # One shell re-initialization attempt before giving up.
    eval "$(/home/ubuntu/miniconda/bin/conda shell.bash hook)"
    if ! command -v conda &> /dev/null; then
        echo "ERROR: conda still not on PATH after install"
        exit 1
    fi
fi

eval "$(/home/ubuntu/miniconda/bin/conda shell.bash hook)"

# Create the pinned environment only when missing.
if ! conda env list | grep -q "^influence "; then
    echo "Creating conda environment (this may take a few minutes)..."
    conda create -n influence python=3.11.9 -y
fi
conda activate influence

echo "Installing Python dependencies..."
pip install -e . 2>&1 | tee -a /home/ubuntu/pip-install.log
echo "Installing flash-attn (this will take several minutes)..."
pip install flash-attn==2.6.3 --no-build-isolation 2>&1 | tee -a /home/ubuntu/pip-install.log

echo "Logging in to HuggingFace..."
source .env
huggingface-cli login --token $HUGGING_FACE_HUB_TOKEN

# Confirm the WandB key loaded without echoing the secret.
echo "WandB API key loaded: ${WANDB_API_KEY:0:10}..."

# Self-contained runner: re-activates the environment and re-sources the
# secrets so it survives the SSH session going away. Escaped dollars expand
# when the runner executes, unescaped ones expand right now.
cat > /home/ubuntu/run_experiment.sh <<EOF
#!/bin/bash
set -e

eval "\$(/home/ubuntu/miniconda/bin/conda shell.bash hook)"
conda activate influence

cd /home/ubuntu/manipulation_hackathon
source .env

echo "=== Starting experiment: ${EXPERIMENT_NAME} at \$(date) ===" | tee /home/ubuntu/experiment-output.log
echo "Experiment output is logged to /home/ubuntu/experiment-output.log" | tee -a /home/ubuntu/experiment-output.log

python targeted_llm_manipulation/experiments/run_experiment.py --config=${CONFIG_REF} --all-gpus 2>&1 | tee -a /home/ubuntu/experiment-output.log

exit_code=\${PIPESTATUS[0]}

if [ \$exit_code -eq 0 ]; then
    echo "=== Experiment ${EXPERIMENT_NAME} completed successfully at \$(date) ===" | tee -a /home/ubuntu/experiment-output.log
else
    echo "=== Experiment ${EXPERIMENT_NAME} FAILED with exit code \$exit_code at \$(date) ===" | tee -a /home/ubuntu/experiment-output.log
fi

exit \$exit_code
EOF

chmod +x /home/ubuntu/run_experiment.sh

# Detached launch so the training run outlives this SSH session.
if screen -ls | grep -q "\.experiment"; then
    echo "Screen session 'experiment' already running; leaving it alone"
else
    echo "=== Launching experiment in screen session 'experiment' ==="
    screen -dmS experiment /home/ubuntu/run_experiment.sh
fi

echo "=== Setup script completed at $(date) ==="
"#;
