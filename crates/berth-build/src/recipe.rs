//! Build recipe generation.
//!
//! Every framework gets a staged Dockerfile: a build stage that
//! installs dependencies and produces artifacts, then a minimal
//! runtime stage copying only those artifacts. A `.dockerignore` keeps
//! repository noise out of the build context.

use std::path::Path;

use berth_core::Framework;

use crate::error::BuildResult;

/// Files excluded from the build context.
const DOCKERIGNORE: &str = "\
.git
.gitignore
.env
*.md
__pycache__
*.pyc
node_modules
Dockerfile
.dockerignore
";

const STATIC_SITE_DOCKERFILE: &str = "\
FROM python:3.12-slim AS build
WORKDIR /app
COPY requirements.txt* ./
RUN if [ -f requirements.txt ]; then pip install --no-cache-dir -r requirements.txt; fi
COPY . .
RUN if [ -f mkdocs.yml ]; then mkdocs build --site-dir /site; \\
    elif [ -f pelicanconf.py ]; then pelican -o /site; \\
    else mkdir -p /site && cp -r . /site; fi

FROM nginx:1.27-alpine
COPY --from=build /site /usr/share/nginx/html
EXPOSE 80
";

const BACKEND_SERVICE_DOCKERFILE: &str = "\
FROM python:3.12-slim AS build
WORKDIR /app
COPY requirements.txt ./
RUN pip install --no-cache-dir --prefix=/install -r requirements.txt

FROM python:3.12-slim
WORKDIR /app
COPY --from=build /install /usr/local
COPY . .
EXPOSE 8000
CMD [\"gunicorn\", \"--bind\", \"0.0.0.0:8000\", \"app:app\"]
";

const GENERIC_DOCKERFILE: &str = "\
FROM python:3.12-slim AS build
WORKDIR /app
COPY requirements.txt* ./
RUN if [ -f requirements.txt ]; then pip install --no-cache-dir --prefix=/install -r requirements.txt; fi

FROM python:3.12-slim
WORKDIR /app
COPY --from=build /install* /usr/local
COPY . .
EXPOSE 8000
CMD [\"python\", \"main.py\"]
";

/// Dockerfile contents for a detected framework.
#[must_use]
pub fn dockerfile_for(framework: Framework) -> &'static str {
    match framework {
        Framework::StaticSite => STATIC_SITE_DOCKERFILE,
        Framework::BackendService => BACKEND_SERVICE_DOCKERFILE,
        Framework::Generic => GENERIC_DOCKERFILE,
    }
}

/// Write the Dockerfile and `.dockerignore` into the working directory.
pub fn write_recipe(source_dir: &Path, framework: Framework) -> BuildResult<()> {
    std::fs::write(source_dir.join("Dockerfile"), dockerfile_for(framework))?;
    std::fs::write(source_dir.join(".dockerignore"), DOCKERIGNORE)?;
    Ok(())
}
