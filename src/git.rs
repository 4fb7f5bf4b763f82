//! Integração com Git via libgit2 para o destino de publicação `git:`.
//!
//! O [`GitManager`] grava um único commit por lote publicado, contendo apenas
//! os caminhos daquele lote.

use std::path::Path;

use git2::{ErrorCode, Repository, Signature};

/// Gerenciador de operações Git usando a biblioteca libgit2.
pub struct GitManager {
    repo: Repository,
}

impl GitManager {
    /// Abre um repositório existente.
    pub fn open(path: &Path) -> Result<Self, git2::Error> {
        Ok(Self {
            repo: Repository::open(path)?,
        })
    }

    /// Abre o repositório em `path`, criando-o se ainda não existir.
    pub fn open_or_init(path: &Path) -> Result<Self, git2::Error> {
        match Self::open(path) {
            Ok(manager) => Ok(manager),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(Self {
                repo: Repository::init(path)?,
            }),
            Err(e) => Err(e),
        }
    }

    /// Adiciona ao index os caminhos (relativos à work tree) e cria um commit.
    ///
    /// Retorna o hash curto, ou `None` quando a árvore resultante é igual à do
    /// HEAD e não há nada para commitar.
    pub fn commit_paths(&self, paths: &[String], message: &str) -> Result<Option<String>, git2::Error> {
        let mut index = self.repo.index()?;
        for path in paths {
            index.add_path(Path::new(path))?;
        }
        index.write()?;

        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;

        let parent = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            // Repositório recém-criado: o primeiro commit não tem pai.
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => None,
            Err(e) => return Err(e),
        };
        if parent.as_ref().is_some_and(|p| p.tree_id() == tree_oid) {
            return Ok(None);
        }

        let sig = self
            .repo
            .signature()
            .or_else(|_| Signature::now("outbox", "outbox@localhost"))?;
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;

        Ok(Some(oid.to_string()[..7].to_string()))
    }

    /// Nome da branch atual.
    pub fn current_branch(&self) -> Result<String, git2::Error> {
        let head = self.repo.head()?;
        Ok(head.shorthand().unwrap_or("HEAD").to_string())
    }
}
